// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs, clippy::unwrap_used)]
use dumpvault_core::config::{ConfigError, ConfigService, RawJobConfig, JOB_CONFIG_KEY};
use dumpvault_dry_tests::InMemoryConfigStore;

#[test]
fn saved_template_loads_as_a_valid_job() {
    let store = InMemoryConfigStore::new();
    let service = ConfigService::new(store.clone());

    service.save(JOB_CONFIG_KEY, &RawJobConfig::template()).unwrap();
    let job = service.load_job().unwrap();

    assert_eq!(job.data_source_names, ["database1", "database2"]);
    assert_eq!(store.save_count(), 1);
    assert_eq!(store.load_count(), 1);
}

#[test]
fn missing_document_is_not_found() {
    let service = ConfigService::new(InMemoryConfigStore::new());
    assert!(matches!(service.load_job(), Err(ConfigError::NotFound)));
    assert!(service.load::<RawJobConfig>(JOB_CONFIG_KEY).unwrap().is_none());
}

#[test]
fn store_failures_propagate() {
    let store = InMemoryConfigStore::new();
    store.set_fail_on_load(true);
    let service = ConfigService::new(store);
    assert!(matches!(service.load_job(), Err(ConfigError::Other(_))));
}

#[test]
fn malformed_json_is_a_serde_error() {
    let store = InMemoryConfigStore::with_entry(JOB_CONFIG_KEY, r#"{ "remote_dir": 7 }"#);
    let service = ConfigService::new(store);
    assert!(matches!(service.load_job(), Err(ConfigError::Serde(_))));
}

#[test]
fn saved_document_is_pretty_json_with_every_field() {
    let store = InMemoryConfigStore::new();
    ConfigService::new(store.clone())
        .save(JOB_CONFIG_KEY, &RawJobConfig::template())
        .unwrap();

    let text = String::from_utf8(store.raw(JOB_CONFIG_KEY).unwrap()).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&text).unwrap();
    for field in [
        "data_source",
        "data_source_names",
        "remote",
        "remote_dir",
        "local_dir",
        "quota_bytes",
        "archive_ext",
        "utc_offset",
        "timeouts",
        "dumper",
        "archiver",
    ] {
        assert!(doc.get(field).is_some(), "{field} missing from template");
    }
    assert!(text.contains('\n'));
}
