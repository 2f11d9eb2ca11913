use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::ScanError;

/// Instrument data layouts the classifier can recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorKind {
    AgilentGcD,
    AgilentIonTrapD,
    AgilentMassHunterD,
    AgilentTofWiff,
    BrukerOneFolder,
    BrukerXmassD,
    BrukerXmassSer,
    BrukerZippedImaging,
    BrukerZippedSFolders,
    #[serde(rename = "decontools_isos")]
    DeconToolsIsos,
    GenericFile,
    ImageFile,
    #[serde(rename = "mzml")]
    MzMl,
    #[serde(rename = "mzxml")]
    MzXml,
    ShimadzuQgd,
    ThermoRaw,
    Uimf,
    WatersRawFolder,
}

impl ProcessorKind {
    pub const ALL: [ProcessorKind; 18] = [
        ProcessorKind::AgilentGcD,
        ProcessorKind::AgilentIonTrapD,
        ProcessorKind::AgilentMassHunterD,
        ProcessorKind::AgilentTofWiff,
        ProcessorKind::BrukerOneFolder,
        ProcessorKind::BrukerXmassD,
        ProcessorKind::BrukerXmassSer,
        ProcessorKind::BrukerZippedImaging,
        ProcessorKind::BrukerZippedSFolders,
        ProcessorKind::DeconToolsIsos,
        ProcessorKind::GenericFile,
        ProcessorKind::ImageFile,
        ProcessorKind::MzMl,
        ProcessorKind::MzXml,
        ProcessorKind::ShimadzuQgd,
        ProcessorKind::ThermoRaw,
        ProcessorKind::Uimf,
        ProcessorKind::WatersRawFolder,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProcessorKind::AgilentGcD => "agilent_gc_d",
            ProcessorKind::AgilentIonTrapD => "agilent_ion_trap_d",
            ProcessorKind::AgilentMassHunterD => "agilent_mass_hunter_d",
            ProcessorKind::AgilentTofWiff => "agilent_tof_wiff",
            ProcessorKind::BrukerOneFolder => "bruker_one_folder",
            ProcessorKind::BrukerXmassD => "bruker_xmass_d",
            ProcessorKind::BrukerXmassSer => "bruker_xmass_ser",
            ProcessorKind::BrukerZippedImaging => "bruker_zipped_imaging",
            ProcessorKind::BrukerZippedSFolders => "bruker_zipped_s_folders",
            ProcessorKind::DeconToolsIsos => "decontools_isos",
            ProcessorKind::GenericFile => "generic_file",
            ProcessorKind::ImageFile => "image_file",
            ProcessorKind::MzMl => "mzml",
            ProcessorKind::MzXml => "mzxml",
            ProcessorKind::ShimadzuQgd => "shimadzu_qgd",
            ProcessorKind::ThermoRaw => "thermo_raw",
            ProcessorKind::Uimf => "uimf",
            ProcessorKind::WatersRawFolder => "waters_raw_folder",
        }
    }
}

impl fmt::Display for ProcessorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProcessorKind {
    type Err = ScanError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        ProcessorKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| ScanError::UnsupportedType(PathBuf::from(value)))
    }
}

/// Outcome of handling one path during a run. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingState {
    #[default]
    NotProcessed,
    ProcessedSuccessfully,
    FailedProcessing,
    SkippedSinceFoundInCache,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentFile {
    pub path: PathBuf,
    pub sha256: Option<String>,
    pub length: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetFileInfo {
    /// External identifier; 0 when unassigned.
    pub dataset_id: i64,
    pub dataset_name: String,
    pub file_extension: String,
    pub acq_time_start: NaiveDateTime,
    pub acq_time_end: NaiveDateTime,
    pub scan_count: u64,
    pub file_size_bytes: u64,
    pub file_system_creation_time: NaiveDateTime,
    pub file_system_modification_time: NaiveDateTime,
    pub info_last_modified: NaiveDateTime,
    pub overall_quality_score: f32,
    pub instrument_files: Vec<InstrumentFile>,
}

impl DatasetFileInfo {
    pub fn new(dataset_name: impl Into<String>, now: NaiveDateTime) -> Self {
        Self {
            dataset_id: 0,
            dataset_name: dataset_name.into(),
            file_extension: String::new(),
            acq_time_start: now,
            acq_time_end: now,
            scan_count: 0,
            file_size_bytes: 0,
            file_system_creation_time: now,
            file_system_modification_time: now,
            info_last_modified: now,
            overall_quality_score: 0.0,
            instrument_files: Vec::new(),
        }
    }

    /// Swaps the acquisition window when a processor left it inverted.
    pub fn finalize_acq_times(&mut self) {
        if self.acq_time_end < self.acq_time_start {
            std::mem::swap(&mut self.acq_time_start, &mut self.acq_time_end);
        }
    }

    pub(crate) fn truncate_to_seconds(&mut self) {
        for value in [
            &mut self.acq_time_start,
            &mut self.acq_time_end,
            &mut self.file_system_creation_time,
            &mut self.file_system_modification_time,
            &mut self.info_last_modified,
        ] {
            *value = whole_seconds(*value);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryIntegrityInfo {
    pub directory_id: u32,
    pub directory_path: String,
    pub file_count: u32,
    pub file_count_fail_integrity: u32,
    pub info_last_modified: NaiveDateTime,
}

impl DirectoryIntegrityInfo {
    /// Builds a row for a directory not yet in the cache; the id is assigned on upsert.
    pub fn new(directory_path: impl Into<String>, now: NaiveDateTime) -> Self {
        Self {
            directory_id: 0,
            directory_path: directory_path.into(),
            file_count: 0,
            file_count_fail_integrity: 0,
            info_last_modified: whole_seconds(now),
        }
    }
}

pub(crate) fn whole_seconds(value: NaiveDateTime) -> NaiveDateTime {
    value.with_nanosecond(0).unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::NaiveDate;

    use super::*;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 1, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn parse_processor_kind() {
        let kind: ProcessorKind = "Thermo_Raw".parse().unwrap();
        assert_eq!(kind, ProcessorKind::ThermoRaw);
        assert_eq!(kind.to_string(), "thermo_raw");
    }

    #[test]
    fn parse_processor_kind_invalid() {
        let err = "sciex".parse::<ProcessorKind>().unwrap_err();
        assert_matches!(err, ScanError::UnsupportedType(_));
    }

    #[test]
    fn finalize_swaps_inverted_window() {
        let mut info = DatasetFileInfo::new("DatasetA", at(0, 0, 0));
        info.acq_time_start = at(2, 0, 0);
        info.acq_time_end = at(1, 0, 0);
        info.finalize_acq_times();
        assert_eq!(info.acq_time_start, at(1, 0, 0));
        assert_eq!(info.acq_time_end, at(2, 0, 0));
    }

    #[test]
    fn truncate_drops_subsecond_precision() {
        let precise = at(3, 4, 5).with_nanosecond(123_456_789).unwrap();
        let mut info = DatasetFileInfo::new("DatasetA", precise);
        info.truncate_to_seconds();
        assert_eq!(info.info_last_modified, at(3, 4, 5));
        assert_eq!(info.acq_time_end, at(3, 4, 5));
    }
}
