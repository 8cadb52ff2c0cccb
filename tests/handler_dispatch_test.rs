//! Handler dispatch, composite models, migrations and the uniform interface.

mod common;

use std::collections::BTreeMap;
use std::fs;

use common::{bare_packager, factor_context, registry, sample_input, LinearModel, ScaledModel};
use modelpack::bundle::RECORD_FILE;
use modelpack::handlers::{BlobMigrator, MigrationPlan, ModelHandler};
use modelpack::{
    BlobError, BlobMeta, ColumnData, CustomHandler, DataType, EstimatorHandler, FeatureSpec, HandlerError,
    HandlerRegistry, MetadataError, ModelSignature, Packager, SaveOptions, SessionOptions,
};

/// Models no handler recognizes are rejected before anything is written.
#[test]
fn test_unhandled_model_rejected() {
    let root = tempfile::tempdir().expect("tempdir");
    let packager = bare_packager();
    let mut session = packager
        .open_session(&root.path().join("bundle"), SessionOptions::new("b", "custom"))
        .expect("open session");

    let err = session
        .save_model("b", &42_u32, Some(&sample_input(2)), &SaveOptions::default())
        .unwrap_err();
    assert!(matches!(err, MetadataError::Handler(HandlerError::NoHandler)));
    assert!(session.meta().blobs().is_empty());
}

#[test]
fn test_duplicate_kind_registration_rejected() {
    let mut registry = registry();
    let err = registry
        .register(CustomHandler::<ScaledModel>::new())
        .unwrap_err();
    assert!(matches!(err, HandlerError::DuplicateKind(kind) if kind == "custom"));
    assert_eq!(registry.kinds(), vec!["custom", "estimator"]);
}

#[test]
fn test_cast_rejects_foreign_value() {
    let handler = EstimatorHandler::<LinearModel>::new();
    assert!(matches!(
        handler.cast(&"not a model"),
        Err(HandlerError::CastFailed { .. })
    ));
    assert!(!ModelHandler::can_handle(&handler, &1.5_f64));
}

#[test]
fn test_target_method_not_callable_rejected() {
    let root = tempfile::tempdir().expect("tempdir");
    let packager = bare_packager();
    let model = LinearModel {
        weight: 1.0,
        bias: 0.0,
    };
    let mut session = packager
        .open_session(&root.path().join("bundle"), SessionOptions::new("b", "estimator"))
        .expect("open session");

    let options = SaveOptions::default().with_target_methods(["transform"]);
    let err = session
        .save_model("b", &model, Some(&sample_input(2)), &options)
        .unwrap_err();
    assert!(matches!(
        err,
        MetadataError::Handler(HandlerError::InvalidTargetMethod { ref method, .. }) if method == "transform"
    ));

    let options = SaveOptions::default().with_target_methods(["fit"]);
    let err = session
        .save_model("b", &model, Some(&sample_input(2)), &options)
        .unwrap_err();
    assert!(matches!(
        err,
        MetadataError::Handler(HandlerError::InvalidTargetMethod { .. })
    ));
}

/// Explicit signatures naming a method the model lacks fail the save.
#[test]
fn test_explicit_signature_for_missing_method() {
    let root = tempfile::tempdir().expect("tempdir");
    let packager = bare_packager();
    let model = ScaledModel::new(factor_context(root.path(), 1.0)).expect("model");
    let signature = ModelSignature::new(
        vec![FeatureSpec::new("input", DataType::Double)],
        vec![FeatureSpec::new("output", DataType::Double)],
    );
    let mut session = packager
        .open_session(
            &root.path().join("bundle"),
            SessionOptions::new("b", "custom")
                .with_signatures(BTreeMap::from([("transform".to_string(), signature)])),
        )
        .expect("open session");

    let err = session
        .save_model("b", &model, None, &SaveOptions::default())
        .unwrap_err();
    assert!(matches!(
        err,
        MetadataError::Handler(HandlerError::UnsupportedMethod(ref m)) if m == "transform"
    ));
}

/// A custom model with a sub-model writes a sibling blob and is rebuilt
/// with that sub-model on load.
#[test]
fn test_composite_model_round_trip() {
    let root = tempfile::tempdir().expect("tempdir");
    let target = root.path().join("composite");
    let base = LinearModel {
        weight: 2.0,
        bias: 1.0,
    };
    let context = factor_context(root.path(), 10.0).with_sub_model("base", base.clone());
    let model = ScaledModel::new(context).expect("model");
    let packager = bare_packager();

    let mut session = packager
        .open_session(&target, SessionOptions::new("composite", "custom"))
        .expect("open session");
    session
        .save_model("composite", &model, Some(&sample_input(3)), &SaveOptions::default())
        .expect("save model");
    let saved = session.close().expect("close session");

    assert_eq!(saved.blobs().names(), vec!["base", "composite"]);
    assert_eq!(saved.blobs().get("base").expect("base blob").model_kind, "estimator");
    assert_eq!(saved.signatures().expect("signatures").len(), 1);
    assert!(target.join("base").join("model.json").exists());

    let bundle = packager.open_bundle(&target).expect("open bundle");
    let native = bundle.load_model().expect("load model");
    let restored = native.downcast_ref::<ScaledModel>().expect("scaled model");
    assert_eq!(restored.base(), Some(&base));

    let uniform = bundle.load_uniform().expect("uniform");
    let out = uniform.invoke("predict", &sample_input(2)).expect("predict");
    assert_eq!(
        out.column("output").expect("output").data,
        ColumnData::Float(vec![10.0, 30.0])
    );
}

#[test]
fn test_uniform_multi_output_labeled() {
    let root = tempfile::tempdir().expect("tempdir");
    let target = root.path().join("linear");
    let packager = bare_packager();
    let model = LinearModel {
        weight: 0.0,
        bias: 0.0,
    };

    let mut session = packager
        .open_session(&target, SessionOptions::new("linear", "estimator"))
        .expect("open session");
    session
        .save_model(
            "linear",
            &model,
            Some(&sample_input(5)),
            &SaveOptions::default().with_target_methods(["predict_proba"]),
        )
        .expect("save model");
    session.close().expect("close session");

    let uniform = packager
        .open_bundle(&target)
        .expect("open bundle")
        .load_uniform()
        .expect("uniform");
    assert_eq!(uniform.methods(), vec!["predict_proba"]);
    let out = uniform.invoke("predict_proba", &sample_input(3)).expect("invoke");
    assert_eq!(out.num_columns(), 4);
    assert_eq!(out.num_rows(), 3);
    assert_eq!(
        out.column_names(),
        vec![
            "output_feature_0",
            "output_feature_1",
            "output_feature_2",
            "output_feature_3"
        ]
    );
    assert!(matches!(
        uniform.invoke("predict", &sample_input(1)),
        Err(HandlerError::UnknownMethod(_))
    ));
}

struct RelocateState;

impl BlobMigrator for RelocateState {
    fn source_version(&self) -> &str {
        "2023-12-01"
    }

    fn target_version(&self) -> &str {
        "2024-06-01"
    }

    fn upgrade(&self, mut blob: BlobMeta) -> Result<BlobMeta, HandlerError> {
        blob.relative_path = "model.json".to_string();
        Ok(blob)
    }
}

fn rewrite_blob(target: &std::path::Path, blob: &str, version: &str, relative_path: &str) {
    let record_path = target.join(RECORD_FILE);
    let mut record: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&record_path).expect("read record"))
            .expect("parse record");
    record["blobs"][blob]["handler_version"] = serde_json::json!(version);
    record["blobs"][blob]["relative_path"] = serde_json::json!(relative_path);
    fs::write(&record_path, record.to_string()).expect("write record");
}

fn save_linear(packager: &Packager, target: &std::path::Path) {
    let model = LinearModel {
        weight: 4.0,
        bias: 0.5,
    };
    let mut session = packager
        .open_session(target, SessionOptions::new("linear", "estimator"))
        .expect("open session");
    session
        .save_model("linear", &model, Some(&sample_input(2)), &SaveOptions::default())
        .expect("save model");
    session.close().expect("close session");
}

/// Blobs written by an older handler version are upgraded in memory.
#[test]
fn test_old_blob_migrated_on_load() {
    let root = tempfile::tempdir().expect("tempdir");
    let target = root.path().join("linear");

    let mut registry = HandlerRegistry::new();
    registry
        .register(
            EstimatorHandler::<LinearModel>::new()
                .with_migrations(MigrationPlan::new().with_step(RelocateState)),
        )
        .expect("register");
    let packager = Packager::new(registry);
    save_linear(&packager, &target);
    rewrite_blob(&target, "linear", "2023-12-01", "legacy.bin");

    let bundle = packager.open_bundle(&target).expect("open bundle");
    let native = bundle.load_model().expect("load model");
    assert_eq!(
        native.downcast_ref::<LinearModel>().map(|m| m.weight),
        Some(4.0)
    );
    // The record on disk is not rewritten.
    let raw = fs::read_to_string(target.join(RECORD_FILE)).expect("read record");
    assert!(raw.contains("2023-12-01"));
}

#[test]
fn test_unknown_handler_version_rejected() {
    let root = tempfile::tempdir().expect("tempdir");
    let target = root.path().join("linear");
    let packager = bare_packager();
    save_linear(&packager, &target);
    rewrite_blob(&target, "linear", "2020-01-01", "model.json");

    let err = packager
        .open_bundle(&target)
        .expect("open bundle")
        .load_model()
        .unwrap_err();
    assert!(matches!(
        err,
        MetadataError::Handler(HandlerError::UnsupportedHandlerVersion { ref found, .. }) if found == "2020-01-01"
    ));
}

#[test]
fn test_unknown_model_kind_rejected() {
    let root = tempfile::tempdir().expect("tempdir");
    let target = root.path().join("linear");
    save_linear(&bare_packager(), &target);

    let other = Packager::new(HandlerRegistry::new());
    let err = other
        .open_bundle(&target)
        .expect("open bundle")
        .load_model()
        .unwrap_err();
    assert!(matches!(
        err,
        MetadataError::Handler(HandlerError::UnknownModelKind(ref kind)) if kind == "estimator"
    ));
}

#[test]
fn test_missing_blob_reported() {
    let root = tempfile::tempdir().expect("tempdir");
    let target = root.path().join("linear");
    let packager = bare_packager();
    save_linear(&packager, &target);

    let err = packager
        .open_bundle(&target)
        .expect("open bundle")
        .load_blob("absent")
        .unwrap_err();
    assert!(matches!(
        err,
        MetadataError::Handler(HandlerError::Blob(modelpack::BlobError::NotFound(_)))
    ));
}

/// Blob names that would land outside the bundle root or shadow the bundle
/// layout are refused before any handler writes.
#[test]
fn test_blob_names_confined_to_bundle_root() {
    let root = tempfile::tempdir().expect("tempdir");
    let target = root.path().join("bundle");
    let packager = bare_packager();
    let model = LinearModel {
        weight: 1.0,
        bias: 0.0,
    };

    let mut session = packager
        .open_session(&target, SessionOptions::new("bundle", "estimator"))
        .expect("open session");
    for name in ["../escaped", "/tmp/absolute", "nested/blob", "", "metadata.record", "env", "code"] {
        let err = session
            .save_model(name, &model, Some(&sample_input(2)), &SaveOptions::default())
            .unwrap_err();
        assert!(
            matches!(
                err,
                MetadataError::Handler(HandlerError::Blob(BlobError::InvalidName { .. }))
            ),
            "{:?} was accepted",
            name
        );
    }
    assert!(session.meta().blobs().is_empty());
    assert!(session.meta().signatures().is_none());
    drop(session);

    assert!(!root.path().join("escaped").exists());
    assert_eq!(fs::read_dir(root.path()).expect("read root").count(), 0);
}

/// A save that fails half way leaves neither metadata nor staged files.
#[test]
fn test_failed_save_rolled_back() {
    let root = tempfile::tempdir().expect("tempdir");
    let target = root.path().join("bundle");
    let base = LinearModel {
        weight: 2.0,
        bias: 1.0,
    };
    let context = factor_context(root.path(), 3.0).with_sub_model("base", base);
    let model = ScaledModel::new(context).expect("model");
    fs::remove_file(root.path().join("factor.txt")).expect("remove artifact");
    let packager = bare_packager();

    let mut session = packager
        .open_session(&target, SessionOptions::new("bundle", "custom"))
        .expect("open session");
    let before = session.meta().clone();
    let err = session
        .save_model("bundle", &model, Some(&sample_input(2)), &SaveOptions::default())
        .unwrap_err();
    assert!(matches!(err, MetadataError::Handler(HandlerError::Io { .. })));

    assert_eq!(session.meta(), &before);
    assert!(session.meta().signatures().is_none());
    assert!(session.meta().blobs().is_empty());
    assert_eq!(
        fs::read_dir(session.blob_dir()).expect("read staging").count(),
        0
    );

    let err = session.close().unwrap_err();
    assert!(matches!(err, MetadataError::SignaturesUnresolved));
    assert!(!target.exists());
}

fn save_composite(packager: &Packager, root: &std::path::Path, target: &std::path::Path) {
    let context = factor_context(root, 2.0).with_sub_model(
        "base",
        LinearModel {
            weight: 1.0,
            bias: 0.0,
        },
    );
    let model = ScaledModel::new(context).expect("model");
    let mut session = packager
        .open_session(target, SessionOptions::new("composite", "custom"))
        .expect("open session");
    session
        .save_model("composite", &model, Some(&sample_input(2)), &SaveOptions::default())
        .expect("save model");
    session.close().expect("close session");
}

/// Sub-model links that loop back are reported instead of recursing.
#[test]
fn test_sub_model_cycles_rejected() {
    let root = tempfile::tempdir().expect("tempdir");
    let target = root.path().join("composite");
    let packager = bare_packager();
    save_composite(&packager, root.path(), &target);

    let record_path = target.join(RECORD_FILE);
    let original = fs::read_to_string(&record_path).expect("read record");

    // Self-reference.
    let mut record: serde_json::Value = serde_json::from_str(&original).expect("parse record");
    record["blobs"]["composite"]["handler_options"]["sub_models"] =
        serde_json::json!("[\"composite\"]");
    fs::write(&record_path, record.to_string()).expect("write record");

    let bundle = packager.open_bundle(&target).expect("open bundle");
    let err = bundle.load_model().unwrap_err();
    assert!(matches!(
        err,
        MetadataError::Handler(HandlerError::SubModelCycle(ref name)) if name == "composite"
    ));
    assert!(matches!(
        bundle.load_uniform(),
        Err(MetadataError::Handler(HandlerError::SubModelCycle(_)))
    ));

    // Two blobs naming each other.
    let mut record: serde_json::Value = serde_json::from_str(&original).expect("parse record");
    record["blobs"]["composite"]["handler_options"]["sub_models"] =
        serde_json::json!("[\"loop\"]");
    record["blobs"]["loop"] = serde_json::json!({
        "model_kind": "custom",
        "relative_path": "artifacts",
        "handler_version": "2024-06-01",
        "handler_options": {"sub_models": "[\"composite\"]"}
    });
    fs::write(&record_path, record.to_string()).expect("write record");

    let err = packager
        .open_bundle(&target)
        .expect("open bundle")
        .load_model()
        .unwrap_err();
    assert!(matches!(
        err,
        MetadataError::Handler(HandlerError::SubModelCycle(ref name)) if name == "composite"
    ));

    // The untouched sibling still loads.
    let base = packager
        .open_bundle(&target)
        .expect("open bundle")
        .load_blob("base")
        .expect("load base");
    assert!(base.downcast_ref::<LinearModel>().is_some());
}
