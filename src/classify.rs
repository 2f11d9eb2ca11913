//! Maps a file or directory to the processor that understands it.
//!
//! Vendors reuse extensions across incompatible layouts, so matching is an
//! ordered list of rules evaluated first-match-wins. Rules only look at
//! names and at the immediate contents of a directory; nothing is parsed.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::domain::ProcessorKind;

/// Directory name Bruker uses for a bundle of spectra inside a dataset directory.
pub const BUNDLE_SENTINEL_DIR: &str = "1";

pub const KNOWN_DIRECTORY_EXTENSIONS: &[&str] = &[".d", ".raw"];

pub const KNOWN_FILE_EXTENSIONS: &[&str] = &[
    ".raw", ".wiff", ".uimf", ".mzml", ".mzxml", ".qgd", ".png", ".jpg", ".tif", ".tiff",
];

static ZIPPED_IMAGING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\d+_R\d+X\d+.*\.zip$").expect("valid regex"));
static ZIPPED_S_FOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^S\d+\.zip$").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub kind: ProcessorKind,
    pub is_directory: bool,
}

struct Rule {
    name: &'static str,
    applies: fn(&Path) -> bool,
    kind: ProcessorKind,
}

const DIRECTORY_RULES: &[Rule] = &[
    Rule {
        name: "bundle sentinel directory",
        applies: is_bundle_sentinel,
        kind: ProcessorKind::BrukerOneFolder,
    },
    Rule {
        name: "waters .raw directory",
        applies: is_waters_raw_dir,
        kind: ProcessorKind::WatersRawFolder,
    },
    Rule {
        name: ".d with AcqData",
        applies: is_mass_hunter_d,
        kind: ProcessorKind::AgilentMassHunterD,
    },
    Rule {
        name: ".d with analysis.baf or analysis.tdf",
        applies: is_bruker_analysis_d,
        kind: ProcessorKind::BrukerXmassD,
    },
    Rule {
        name: ".d with ser or fid",
        applies: is_bruker_ser_d,
        kind: ProcessorKind::BrukerXmassD,
    },
    Rule {
        name: ".d with *.yep",
        applies: is_ion_trap_d,
        kind: ProcessorKind::AgilentIonTrapD,
    },
    Rule {
        name: ".d with DATA.MS",
        applies: is_gc_d,
        kind: ProcessorKind::AgilentGcD,
    },
    Rule {
        name: "directory of zipped imaging files",
        applies: has_zipped_imaging_files,
        kind: ProcessorKind::BrukerZippedImaging,
    },
    Rule {
        name: "directory of zipped S folders",
        applies: has_zipped_s_folders,
        kind: ProcessorKind::BrukerZippedSFolders,
    },
];

const FILE_RULES: &[Rule] = &[
    Rule {
        name: "ser file",
        applies: is_ser_file,
        kind: ProcessorKind::BrukerXmassSer,
    },
    Rule {
        name: "fid file next to ser",
        applies: is_fid_next_to_ser,
        kind: ProcessorKind::BrukerXmassSer,
    },
    Rule {
        name: "fid file next to acqus",
        applies: is_fid_next_to_acqus,
        kind: ProcessorKind::BrukerOneFolder,
    },
    Rule {
        name: "fid file",
        applies: is_fid_file,
        kind: ProcessorKind::BrukerXmassSer,
    },
    Rule {
        name: "analysis.baf file",
        applies: is_analysis_baf,
        kind: ProcessorKind::BrukerXmassSer,
    },
    Rule {
        name: "DeconTools _isos file",
        applies: is_isos_file,
        kind: ProcessorKind::DeconToolsIsos,
    },
    Rule {
        name: ".raw file",
        applies: |path| has_extension(path, ".raw"),
        kind: ProcessorKind::ThermoRaw,
    },
    Rule {
        name: ".wiff file",
        applies: |path| has_extension(path, ".wiff"),
        kind: ProcessorKind::AgilentTofWiff,
    },
    Rule {
        name: ".uimf file",
        applies: |path| has_extension(path, ".uimf"),
        kind: ProcessorKind::Uimf,
    },
    Rule {
        name: ".mzml file",
        applies: |path| has_extension(path, ".mzml"),
        kind: ProcessorKind::MzMl,
    },
    Rule {
        name: ".mzxml file",
        applies: |path| has_extension(path, ".mzxml"),
        kind: ProcessorKind::MzXml,
    },
    Rule {
        name: ".qgd file",
        applies: |path| has_extension(path, ".qgd"),
        kind: ProcessorKind::ShimadzuQgd,
    },
    Rule {
        name: "image file",
        applies: is_image_file,
        kind: ProcessorKind::ImageFile,
    },
    Rule {
        name: "zipped imaging file",
        applies: is_zipped_imaging_name,
        kind: ProcessorKind::BrukerZippedImaging,
    },
    Rule {
        name: "zipped S folder",
        applies: is_zipped_s_folder_name,
        kind: ProcessorKind::BrukerZippedSFolders,
    },
];

#[derive(Debug, Clone, Copy, Default)]
pub struct Classifier {
    generic_fallback: bool,
}

impl Classifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept any regular file as [`ProcessorKind::GenericFile`] when no rule matches.
    pub fn with_generic_fallback(mut self, enabled: bool) -> Self {
        self.generic_fallback = enabled;
        self
    }

    pub fn classify(&self, path: &Path) -> Option<Classification> {
        if path.is_dir() {
            let path = strip_trailing_separator(path);
            return first_match(DIRECTORY_RULES, &path).map(|kind| Classification {
                kind,
                is_directory: true,
            });
        }

        if !path.is_file() {
            return None;
        }

        first_match(FILE_RULES, path)
            .or(self.generic_fallback.then_some(ProcessorKind::GenericFile))
            .map(|kind| Classification {
                kind,
                is_directory: false,
            })
    }

    /// Name of the rule that would win for `path`, for diagnostics.
    pub fn explain(&self, path: &Path) -> Option<&'static str> {
        if path.is_dir() {
            let path = strip_trailing_separator(path);
            return DIRECTORY_RULES
                .iter()
                .find(|rule| (rule.applies)(&path))
                .map(|rule| rule.name);
        }
        if !path.is_file() {
            return None;
        }
        FILE_RULES
            .iter()
            .find(|rule| (rule.applies)(path))
            .map(|rule| rule.name)
            .or(self.generic_fallback.then_some("generic fallback"))
    }
}

fn first_match(rules: &[Rule], path: &Path) -> Option<ProcessorKind> {
    rules
        .iter()
        .find(|rule| (rule.applies)(path))
        .map(|rule| rule.kind)
}

pub fn is_known_file_extension(path: &Path) -> bool {
    let ext = crate::fs_util::dotted_extension(path);
    KNOWN_FILE_EXTENSIONS.contains(&ext.as_str())
}

/// Files the walker hands to the orchestrator without the generic fallback.
pub fn is_known_file(path: &Path) -> bool {
    is_known_file_extension(path) || is_marker_file(path) || is_isos_file(path)
}

pub fn is_known_directory_extension(path: &Path) -> bool {
    let ext = crate::fs_util::dotted_extension(path);
    KNOWN_DIRECTORY_EXTENSIONS.contains(&ext.as_str())
}

pub fn is_bundle_sentinel(path: &Path) -> bool {
    file_name_lower(path).as_deref() == Some(BUNDLE_SENTINEL_DIR)
}

/// Marker file names that identify a dataset even without an extension.
pub fn is_marker_file(path: &Path) -> bool {
    matches!(
        file_name_lower(path).as_deref(),
        Some("ser" | "fid" | "analysis.baf")
    )
}

pub fn is_zipped_imaging_name(path: &Path) -> bool {
    file_name(path).is_some_and(|name| ZIPPED_IMAGING.is_match(&name))
}

pub fn is_zipped_s_folder_name(path: &Path) -> bool {
    file_name(path).is_some_and(|name| ZIPPED_S_FOLDER.is_match(&name))
}

fn is_waters_raw_dir(path: &Path) -> bool {
    has_extension(path, ".raw")
}

fn is_mass_hunter_d(path: &Path) -> bool {
    has_extension(path, ".d") && find_child(path, |name, is_dir| is_dir && name == "acqdata")
}

fn is_bruker_analysis_d(path: &Path) -> bool {
    has_extension(path, ".d")
        && find_child(path, |name, is_dir| {
            !is_dir && (name == "analysis.baf" || name == "analysis.tdf")
        })
}

fn is_bruker_ser_d(path: &Path) -> bool {
    has_extension(path, ".d")
        && find_child(path, |name, is_dir| !is_dir && (name == "ser" || name == "fid"))
}

fn is_ion_trap_d(path: &Path) -> bool {
    has_extension(path, ".d") && find_child(path, |name, is_dir| !is_dir && name.ends_with(".yep"))
}

fn is_gc_d(path: &Path) -> bool {
    has_extension(path, ".d") && find_child(path, |name, is_dir| !is_dir && name == "data.ms")
}

fn has_zipped_imaging_files(path: &Path) -> bool {
    find_child(path, |name, is_dir| !is_dir && ZIPPED_IMAGING.is_match(name))
}

fn has_zipped_s_folders(path: &Path) -> bool {
    find_child(path, |name, is_dir| !is_dir && ZIPPED_S_FOLDER.is_match(name))
}

fn is_ser_file(path: &Path) -> bool {
    file_name_lower(path).as_deref() == Some("ser")
}

fn is_fid_file(path: &Path) -> bool {
    file_name_lower(path).as_deref() == Some("fid")
}

fn is_fid_next_to_ser(path: &Path) -> bool {
    is_fid_file(path) && has_sibling(path, "ser")
}

fn is_fid_next_to_acqus(path: &Path) -> bool {
    is_fid_file(path) && has_sibling(path, "acqus")
}

fn is_analysis_baf(path: &Path) -> bool {
    file_name_lower(path).as_deref() == Some("analysis.baf")
}

pub fn is_isos_file(path: &Path) -> bool {
    file_name_lower(path)
        .is_some_and(|name| name.ends_with("_isos.csv") || name.ends_with("_isos.tsv"))
}

fn is_image_file(path: &Path) -> bool {
    [".png", ".jpg", ".tif", ".tiff"]
        .iter()
        .any(|ext| has_extension(path, ext))
}

fn has_extension(path: &Path, ext: &str) -> bool {
    crate::fs_util::dotted_extension(path) == ext
}

fn has_sibling(path: &Path, name: &str) -> bool {
    path.parent()
        .is_some_and(|dir| find_child(dir, |child, is_dir| !is_dir && child == name))
}

/// Scans the immediate children of `dir`, passing lower-cased names.
fn find_child(dir: &Path, predicate: impl Fn(&str, bool) -> bool) -> bool {
    let Ok(entries) = fs::read_dir(dir) else {
        return false;
    };
    entries.flatten().any(|entry| {
        let name = entry.file_name().to_string_lossy().to_ascii_lowercase();
        let is_dir = entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false);
        predicate(&name, is_dir)
    })
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
}

fn file_name_lower(path: &Path) -> Option<String> {
    file_name(path).map(|name| name.to_ascii_lowercase())
}

fn strip_trailing_separator(path: &Path) -> PathBuf {
    path.components().collect()
}
