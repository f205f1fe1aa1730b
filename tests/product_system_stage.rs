mod common;

use std::path::Path;

use tempfile::TempDir;

use common::{standard_service, write_standard_tables, MockService};
use lcautomate::checkpoint::CheckpointStore;
use lcautomate::pipeline::{self, StageContext};

fn ctx<'a>(
    service: &'a MockService,
    store: &'a CheckpointStore,
    root: &'a Path,
) -> StageContext<'a> {
    StageContext {
        service,
        store,
        root,
    }
}

#[test]
fn creates_one_product_system_per_data_column() {
    let dir = TempDir::new().unwrap();
    write_standard_tables(dir.path());
    let service = standard_service();
    let store = CheckpointStore::new(dir.path());
    let ctx = ctx(&service, &store, dir.path());

    pipeline::model::run(&ctx, false).unwrap();
    pipeline::hierarchy::run(&ctx, false).unwrap();
    pipeline::product_system::run(&ctx, false).unwrap();

    assert_eq!(service.systems_created.get(), 2);
    let checkpoint = store.load().unwrap();
    let root = checkpoint.root().unwrap();
    for scenario in ["Farm A", "Farm B"] {
        let record = &root.scenarios[scenario];
        assert!(record.product_system_id.is_some());
        assert_eq!(
            record.product_system_name.as_deref(),
            Some(format!("Pig farm - {scenario}").as_str())
        );
    }
    // Only the top-level template gets product systems.
    for record in checkpoint.template_processes["p-feed"].scenarios.values() {
        assert!(record.product_system_id.is_none());
    }

    pipeline::product_system::run(&ctx, false).unwrap();
    assert_eq!(service.systems_created.get(), 2);
}

#[test]
fn restart_recreates_the_recorded_systems() {
    let dir = TempDir::new().unwrap();
    write_standard_tables(dir.path());
    let service = standard_service();
    let store = CheckpointStore::new(dir.path());
    let ctx = ctx(&service, &store, dir.path());

    pipeline::model::run(&ctx, false).unwrap();
    pipeline::hierarchy::run(&ctx, false).unwrap();
    pipeline::product_system::run(&ctx, false).unwrap();
    let first = store.load().unwrap().root().unwrap().scenarios["Farm A"]
        .product_system_id
        .clone()
        .unwrap();

    pipeline::product_system::run(&ctx, true).unwrap();
    assert_eq!(service.systems_created.get(), 4);
    let second = store.load().unwrap().root().unwrap().scenarios["Farm A"]
        .product_system_id
        .clone()
        .unwrap();
    assert_ne!(first, second);
    assert!(!service.systems.borrow().contains_key(&first));
}

#[test]
fn missing_replicas_are_rejected() {
    let dir = TempDir::new().unwrap();
    write_standard_tables(dir.path());
    let service = standard_service();
    let store = CheckpointStore::new(dir.path());
    let ctx = ctx(&service, &store, dir.path());

    pipeline::model::run(&ctx, false).unwrap();
    let err = pipeline::product_system::run(&ctx, false).unwrap_err();
    assert!(err.to_string().contains("process-hierarchy"), "{err}");
}
