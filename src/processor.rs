use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::domain::{DatasetFileInfo, InstrumentFile, ProcessorKind};
use crate::error::ScanError;
use crate::fs_util::{self, dotted_extension, file_times, now_local, write_bytes_atomic};

/// Format-specific extractor plugged into the scanner.
///
/// `process_data_file` writes into `info` as it goes; when it fails, whatever
/// it managed to fill in is still available to the caller.
pub trait DatasetProcessor {
    fn dataset_name(&self, path: &Path) -> String;

    fn process_data_file(&self, path: &Path, info: &mut DatasetFileInfo) -> Result<(), ScanError>;

    fn create_output_files(
        &self,
        path: &Path,
        info: &DatasetFileInfo,
        output_dir: &Path,
    ) -> Result<(), ScanError>;

    fn dataset_info_xml(&self, info: &DatasetFileInfo) -> String {
        dataset_info_xml(info)
    }
}

pub struct ProcessorRegistry {
    processors: HashMap<ProcessorKind, Box<dyn DatasetProcessor>>,
}

impl ProcessorRegistry {
    pub fn empty() -> Self {
        Self {
            processors: HashMap::new(),
        }
    }

    /// Every kind handled by a [`FileSystemProcessor`].
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        for kind in ProcessorKind::ALL {
            registry.register(kind, FileSystemProcessor::new(kind));
        }
        registry
    }

    pub fn register(
        &mut self,
        kind: ProcessorKind,
        processor: impl DatasetProcessor + 'static,
    ) -> &mut Self {
        self.processors.insert(kind, Box::new(processor));
        self
    }

    pub fn get(&self, kind: ProcessorKind) -> Option<&dyn DatasetProcessor> {
        self.processors.get(&kind).map(|processor| processor.as_ref())
    }
}

/// Dataset naming shared by all layouts.
///
/// Marker files and zipped bundles are named after their dataset directory,
/// the `1` bundle directory after its parent, everything else after its own
/// stem.
pub fn default_dataset_name(kind: ProcessorKind, path: &Path) -> String {
    let stem = |path: &Path| {
        path.file_stem()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    };
    let parent = path.parent().unwrap_or(path);

    match kind {
        ProcessorKind::BrukerOneFolder if path.is_dir() => stem(parent),
        ProcessorKind::BrukerOneFolder => {
            if crate::classify::is_bundle_sentinel(parent) {
                stem(parent.parent().unwrap_or(parent))
            } else {
                stem(parent)
            }
        }
        ProcessorKind::BrukerXmassSer => stem(parent),
        ProcessorKind::BrukerZippedImaging | ProcessorKind::BrukerZippedSFolders
            if path.is_file() =>
        {
            stem(parent)
        }
        ProcessorKind::DeconToolsIsos => {
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let lower = name.to_ascii_lowercase();
            match lower.rfind("_isos.") {
                Some(index) => name[..index].to_string(),
                None => stem(path),
            }
        }
        _ => stem(path),
    }
}

/// Extracts what the filesystem alone can tell about a dataset: sizes,
/// timestamps and content hashes. Used for every kind unless a vendor
/// processor is registered in its place.
pub struct FileSystemProcessor {
    kind: ProcessorKind,
    max_hashed_files: usize,
}

impl FileSystemProcessor {
    pub fn new(kind: ProcessorKind) -> Self {
        Self {
            kind,
            max_hashed_files: 25,
        }
    }

    pub fn with_max_hashed_files(mut self, limit: usize) -> Self {
        self.max_hashed_files = limit;
        self
    }
}

impl DatasetProcessor for FileSystemProcessor {
    fn dataset_name(&self, path: &Path) -> String {
        default_dataset_name(self.kind, path)
    }

    fn process_data_file(&self, path: &Path, info: &mut DatasetFileInfo) -> Result<(), ScanError> {
        let name = info.dataset_name.clone();
        let io_error = |err: std::io::Error| ScanError::processing(name.clone(), err);

        let metadata = fs::metadata(path).map_err(io_error)?;
        let (created, modified) = file_times(&metadata).map_err(io_error)?;
        info.file_extension = dotted_extension(path);
        info.file_system_creation_time = created;
        info.file_system_modification_time = modified;
        info.acq_time_start = created.min(modified);
        info.acq_time_end = modified;

        let files = if metadata.is_dir() {
            fs_util::files_below(path).map_err(io_error)?
        } else {
            vec![path.to_path_buf()]
        };

        info.instrument_files.clear();
        info.file_size_bytes = 0;
        for (index, file) in files.iter().enumerate() {
            let length = fs::metadata(file).map_err(io_error)?.len();
            let sha256 = if index < self.max_hashed_files {
                Some(fs_util::sha256_file(file).map_err(io_error)?)
            } else {
                None
            };
            info.file_size_bytes += length;
            info.instrument_files.push(InstrumentFile {
                path: file.clone(),
                sha256,
                length,
            });
        }

        info.finalize_acq_times();
        info.info_last_modified = now_local();
        Ok(())
    }

    fn create_output_files(
        &self,
        _path: &Path,
        info: &DatasetFileInfo,
        output_dir: &Path,
    ) -> Result<(), ScanError> {
        let sidecar = DatasetSidecar {
            kind: self.kind,
            info,
        };
        let json = serde_json::to_vec_pretty(&sidecar)
            .map_err(|err| ScanError::processing(info.dataset_name.clone(), err))?;
        let json_path = output_dir.join(format!("{}_DatasetInfo.json", info.dataset_name));
        write_bytes_atomic(&json_path, &json)
            .map_err(|err| ScanError::Filesystem(format!("{}: {err}", json_path.display())))?;

        let xml_path = output_dir.join(format!("{}_DatasetInfo.xml", info.dataset_name));
        write_bytes_atomic(&xml_path, self.dataset_info_xml(info).as_bytes())
            .map_err(|err| ScanError::Filesystem(format!("{}: {err}", xml_path.display())))?;
        Ok(())
    }
}

#[derive(Serialize)]
struct DatasetSidecar<'a> {
    kind: ProcessorKind,
    #[serde(flatten)]
    info: &'a DatasetFileInfo,
}

pub fn dataset_info_xml(info: &DatasetFileInfo) -> String {
    let date = |value| crate::cache::format_date(value);
    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    xml.push_str("<DatasetInfo>\n");
    xml.push_str(&format!(
        "  <Dataset>{}</Dataset>\n",
        escape_xml(&info.dataset_name)
    ));
    xml.push_str("  <AcquisitionInfo>\n");
    xml.push_str(&format!("    <ScanCount>{}</ScanCount>\n", info.scan_count));
    xml.push_str(&format!(
        "    <StartTime>{}</StartTime>\n",
        date(info.acq_time_start)
    ));
    xml.push_str(&format!("    <EndTime>{}</EndTime>\n", date(info.acq_time_end)));
    xml.push_str(&format!(
        "    <FileExtension>{}</FileExtension>\n",
        escape_xml(&info.file_extension)
    ));
    xml.push_str(&format!(
        "    <FileSizeBytes>{}</FileSizeBytes>\n",
        info.file_size_bytes
    ));
    xml.push_str("  </AcquisitionInfo>\n");
    xml.push_str("</DatasetInfo>\n");
    xml
}

fn escape_xml(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
