use std::fs;
use std::path::Path;

use msinfo_scanner::classify::{Classifier, is_known_file};
use msinfo_scanner::domain::ProcessorKind;

fn touch(path: &Path) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, b"x").unwrap();
}

#[test]
fn bruker_layouts() {
    let temp = tempfile::tempdir().unwrap();
    let xmass = temp.path().join("Run01.d");
    touch(&xmass.join("ser"));
    let one = temp.path().join("Run02.d").join("1");
    touch(&one.join("fid"));
    touch(&one.join("acqus"));

    let classifier = Classifier::new();
    assert_eq!(
        classifier.classify(&xmass).map(|found| found.kind),
        Some(ProcessorKind::BrukerXmassD)
    );
    assert_eq!(
        classifier.classify(&xmass.join("ser")).map(|found| found.kind),
        Some(ProcessorKind::BrukerXmassSer)
    );
    assert_eq!(
        classifier.classify(&one).map(|found| found.kind),
        Some(ProcessorKind::BrukerOneFolder)
    );
    assert_eq!(
        classifier.classify(&one.join("fid")).map(|found| found.kind),
        Some(ProcessorKind::BrukerOneFolder)
    );
}

#[test]
fn trailing_separator_does_not_change_the_result() {
    let temp = tempfile::tempdir().unwrap();
    let dir = temp.path().join("Run03.raw");
    fs::create_dir_all(&dir).unwrap();
    let with_slash = format!("{}/", dir.display());

    let classifier = Classifier::new();
    assert_eq!(
        classifier.classify(Path::new(&with_slash)),
        classifier.classify(&dir)
    );
}

#[test]
fn walker_filter_matches_classifier_rules() {
    assert!(is_known_file(Path::new("/x/Run01.qgd")));
    assert!(is_known_file(Path::new("/x/Run01.d/analysis.baf")));
    assert!(is_known_file(Path::new("/x/Run01_isos.tsv")));
    assert!(!is_known_file(Path::new("/x/notes.csv")));
    assert!(!is_known_file(Path::new("/x/0_R00X001.zip")));
}
