use chrono::NaiveDate;

use msinfo_scanner::domain::{DatasetFileInfo, ProcessorKind};

#[test]
fn processor_kind_json_name_matches_display() {
    let kind = ProcessorKind::BrukerZippedSFolders;
    assert_eq!(
        serde_json::to_string(&kind).unwrap(),
        format!("\"{kind}\"")
    );
    assert_eq!(kind.to_string(), "bruker_zipped_s_folders");
}

#[test]
fn new_dataset_is_unassigned() {
    let now = NaiveDate::from_ymd_opt(2021, 3, 4)
        .unwrap()
        .and_hms_opt(8, 0, 0)
        .unwrap();
    let info = DatasetFileInfo::new("Run01", now);
    assert_eq!(info.dataset_id, 0);
    assert_eq!(info.file_size_bytes, 0);
    assert!(info.instrument_files.is_empty());
}
