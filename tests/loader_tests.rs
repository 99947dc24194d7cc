mod common;

use std::sync::Arc;

use common::*;
use zeroci::ci::{ConfigError, ConfigResolver, StoreConfig};
use zeroci::prelude::*;

const SERVER_CONFIG: &str = r#"
domain: https://ci.example.com
repos:
  - threefoldtech/zeroCI
  - threefoldtech/js-sdk
timeouts:
  style_check: 60
store:
  type: memory
run_configs:
  threefoldtech/zeroCI:
    DB_URL: postgres://ci
"#;

#[test]
fn test_load_server_config() {
    let dir = create_test_dir();
    let path = write_file(dir.path(), "zeroci.yaml", SERVER_CONFIG);

    let config = ConfigLoader::load_server_config(&path).unwrap();

    assert_eq!(config.domain, "https://ci.example.com");
    assert_eq!(config.repos.len(), 2);
    assert_eq!(config.timeouts.style_check, 60);
    assert_eq!(config.timeouts.test, 3600);
    assert!(matches!(config.store, StoreConfig::Memory));
    assert!(config.chat.is_none());

    let entries = config.run_config_entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "threefoldtech/zeroCI");
    assert_eq!(entries[0].env["DB_URL"], "postgres://ci");
}

#[test]
fn test_load_ci_config() {
    let dir = create_test_dir();
    let path = write_file(
        dir.path(),
        "zeroCI.yaml",
        &ci_file(&["apt-get update", "pip3 install ."], &["pytest", "# flake8"]),
    );

    let config = ConfigLoader::load_ci_config(&path).unwrap();

    assert_eq!(config.prerequisites.image_name(), Some("ubuntu:18.04"));
    assert_eq!(config.install_script(), "apt-get update && pip3 install .");
    assert_eq!(config.test_steps, vec!["pytest", "# flake8"]);
}

#[test]
fn test_load_schedules_sorted_by_name() {
    let dir = create_test_dir();
    write_file(dir.path(), "b.yaml", "name: weekly\ninstall: [make]\nscript: [make test]\n");
    write_file(dir.path(), "a.yml", "name: nightly\ninstall: [make]\n");
    write_file(dir.path(), "notes.txt", "not a schedule");

    let schedules = ConfigLoader::load_schedule_directory(dir.path()).unwrap();

    let names: Vec<_> = schedules.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["nightly", "weekly"]);
    assert!(schedules[0].config.test_steps.is_empty());
    assert_eq!(schedules[1].config.test_steps, vec!["make test"]);
}

#[test]
fn test_invalid_schedule_names_file() {
    let dir = create_test_dir();
    let path = write_file(dir.path(), "broken.yaml", "install: [make]\n");

    let err = ConfigLoader::load_schedule(&path).unwrap_err();
    assert!(err.to_string().contains("broken.yaml"));
}

#[tokio::test]
async fn test_resolver_reads_ci_file_from_vcs() {
    let vcs = Arc::new(FakeVcs::with_ci_file(ci_file(&["make"], &["make test"])));
    let resolver = ConfigResolver::new(vcs, "zeroCI.yaml");

    let config = resolver
        .resolve("threefoldtech/zeroCI", "abc123")
        .await
        .unwrap()
        .expect("config present");
    assert_eq!(config.install_steps, vec!["make"]);
}

#[tokio::test]
async fn test_resolver_absent_and_malformed() {
    let resolver = ConfigResolver::new(Arc::new(FakeVcs::default()), "zeroCI.yaml");
    assert!(resolver.resolve("org/repo", "abc").await.unwrap().is_none());

    let resolver = ConfigResolver::new(Arc::new(FakeVcs::with_ci_file("script: [")), "zeroCI.yaml");
    let err = resolver.resolve("org/repo", "abc").await.unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
}
