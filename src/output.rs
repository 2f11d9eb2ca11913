use std::io::{self, Write};
use std::path::Path;

use serde::Serialize;

use crate::cache::{CacheStats, format_date};
use crate::classify::Classification;
use crate::domain::DatasetFileInfo;
use crate::status::{ProgressEvent, ProgressSink, ScanSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassifyResult<'a> {
    pub path: &'a Path,
    pub classification: Option<Classification>,
    pub rule: Option<&'static str>,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_summary(summary: &ScanSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    pub fn print_classification(result: &ClassifyResult<'_>) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_cache_stats(stats: &CacheStats) -> io::Result<()> {
        Self::print_json(stats)
    }

    pub fn print_dataset(info: &DatasetFileInfo) -> io::Result<()> {
        Self::print_json(info)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Human-readable output. Progress goes to stderr so stdout stays clean.
pub struct TextOutput;

impl TextOutput {
    pub fn print_summary(summary: &ScanSummary) {
        println!("processed:   {}", summary.processed);
        println!("skipped:     {}", summary.skipped);
        println!("failed:      {}", summary.failed);
        println!("unsupported: {}", summary.unsupported);
        if summary.directories_checked > 0 {
            println!("directories: {}", summary.directories_checked);
        }
        if summary.aborted {
            println!("run aborted before completion");
        }
    }

    pub fn print_classification(result: &ClassifyResult<'_>) {
        match (&result.classification, result.rule) {
            (Some(found), Some(rule)) => {
                println!("{}: {} ({rule})", result.path.display(), found.kind)
            }
            (Some(found), None) => println!("{}: {}", result.path.display(), found.kind),
            (None, _) => println!("{}: unsupported", result.path.display()),
        }
    }

    pub fn print_cache_stats(stats: &CacheStats) {
        println!(
            "datasets:    {} rows in {}",
            stats.datasets,
            stats.dataset_cache.display()
        );
        println!(
            "directories: {} rows in {}",
            stats.directories,
            stats.directory_cache.display()
        );
    }

    pub fn print_dataset(info: &DatasetFileInfo) {
        println!("{}", info.dataset_name);
        println!("  id:            {}", info.dataset_id);
        println!("  extension:     {}", info.file_extension);
        println!(
            "  acquisition:   {} .. {}",
            format_date(info.acq_time_start),
            format_date(info.acq_time_end)
        );
        println!("  scans:         {}", info.scan_count);
        println!("  size (bytes):  {}", info.file_size_bytes);
        println!("  modified:      {}", format_date(info.file_system_modification_time));
        println!("  last updated:  {}", format_date(info.info_last_modified));
    }
}

impl ProgressSink for TextOutput {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => eprintln!("{} ({:.1}s)", event.message, elapsed.as_secs_f32()),
            None => eprintln!("{}", event.message),
        }
    }
}
