use std::fs;
use std::time::Duration;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};

use msinfo_scanner::config::{ConfigLoader, ScanOverrides};
use msinfo_scanner::error::ScanError;

#[test]
fn parse_config_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("msinfo-scan.json");
    fs::write(
        &path,
        r#"{
            "base_dir": "/srv/scan",
            "directory_cache_file": "integrity.tsv",
            "autosave_interval_minutes": 1,
            "retry": { "max_attempts": 4, "window_minutes": 10, "delay_seconds": 0 },
            "max_levels_to_recurse": 3,
            "skip_files_in_error": false,
            "abort_file_name": "STOP.txt",
            "status_file": "status.json"
        }"#,
    )
    .unwrap();

    let config = ConfigLoader::read(&path).unwrap();
    let resolved = ConfigLoader::resolve_config(config, Utf8Path::new("/ignored")).unwrap();

    assert_eq!(
        resolved.paths.dataset_cache,
        Utf8PathBuf::from("/srv/scan/DatasetTimeFile.txt")
    );
    assert_eq!(
        resolved.paths.directory_cache,
        Utf8PathBuf::from("/srv/scan/integrity.tsv")
    );
    assert_eq!(resolved.paths.abort_file, Utf8PathBuf::from("/srv/scan/STOP.txt"));
    assert_eq!(
        resolved.paths.status_file,
        Some(Utf8PathBuf::from("/srv/scan/status.json"))
    );
    assert_eq!(resolved.autosave_interval, Duration::from_secs(60));
    assert_eq!(resolved.retry.max_attempts, 4);
    assert_eq!(resolved.retry.recency_window, Duration::from_secs(600));
    assert_eq!(resolved.retry.delay, Duration::ZERO);
    assert_eq!(resolved.max_levels_to_recurse, 3);
    assert!(!resolved.skip_files_in_error);
    assert!(resolved.use_cache);
}

#[test]
fn malformed_config_is_a_parse_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("msinfo-scan.json");
    fs::write(&path, "{ not json").unwrap();
    assert_matches!(ConfigLoader::read(&path), Err(ScanError::ConfigParse(_)));
}

#[test]
fn missing_explicit_config_is_a_read_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");
    let err = ConfigLoader::resolve(path.to_str()).unwrap_err();
    assert_matches!(err, ScanError::ConfigRead(_));
}

#[test]
fn blank_abort_file_name_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("msinfo-scan.json");
    fs::write(&path, r#"{ "abort_file_name": "  " }"#).unwrap();
    let config = ConfigLoader::read(&path).unwrap();
    assert_matches!(
        ConfigLoader::resolve_config(config, Utf8Path::new("/work")),
        Err(ScanError::ConfigParse(_))
    );
}

#[test]
fn overrides_take_precedence() {
    let mut resolved = ConfigLoader::resolve_config(
        serde_json::from_str("{}").unwrap(),
        Utf8Path::new("/work"),
    )
    .unwrap();
    resolved.apply_overrides(&ScanOverrides {
        max_levels_to_recurse: Some(1),
        reprocess: true,
        no_cache: true,
        check_integrity: true,
        no_output_files: true,
        status_file: Some(Utf8PathBuf::from("/tmp/status.json")),
        ..ScanOverrides::default()
    });

    assert_eq!(resolved.max_levels_to_recurse, 1);
    assert!(resolved.reprocess_existing);
    assert!(!resolved.use_cache);
    assert!(resolved.check_integrity);
    assert!(!resolved.create_output_files);
    assert!(!resolved.reprocess_if_cached_size_zero);
    assert_eq!(
        resolved.paths.status_file,
        Some(Utf8PathBuf::from("/tmp/status.json"))
    );
}
