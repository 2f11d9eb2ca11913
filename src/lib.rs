pub mod abort;
pub mod cache;
pub mod classify;
pub mod config;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod integrity;
pub mod output;
pub mod processor;
pub mod scanner;
pub mod status;
pub mod walker;
