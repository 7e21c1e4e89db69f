//! Data plugins
//!
//! A [`DataPlugin`] turns generic export/import requests, carrying a free
//! form options map, into work against a provider. The only plugin shipped
//! here is the [`BackupOrchestrator`].

pub mod orchestrator;

pub use orchestrator::BackupOrchestrator;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Free-form plugin options
pub type Options = BTreeMap<String, String>;

/// Export request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportRequest {
    /// Plugin-specific options
    #[serde(default)]
    pub options: Options,
}

impl ExportRequest {
    /// Request with a single option set
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// Export outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportResult {
    pub success: bool,
    pub output_path: PathBuf,
    pub record_count: u64,
    pub file_size: u64,
    pub checksum: String,
    pub duration_ms: u64,
    pub warnings: Vec<String>,
    pub metadata: BTreeMap<String, String>,
    /// Failure reason; set whenever `success` is false
    pub error: Option<String>,
}

/// Import request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportRequest {
    /// Artifact to import
    pub source: PathBuf,
    /// Plugin-specific options
    #[serde(default)]
    pub options: Options,
}

impl ImportRequest {
    /// Import of `source` with default options
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            options: Options::new(),
        }
    }

    /// Request with a single option set
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// Import outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportResult {
    pub success: bool,
    pub tables_imported: usize,
    pub records_imported: u64,
    pub duration_ms: u64,
    pub warnings: Vec<String>,
    pub metadata: BTreeMap<String, String>,
    /// Failure reason; set whenever `success` is false
    pub error: Option<String>,
}

/// Plugin contract consumed by the host application
#[async_trait]
pub trait DataPlugin: Send + Sync {
    /// Short identifier
    fn name(&self) -> &str;

    /// One-line description
    fn description(&self) -> &str;

    /// Calls the host may run at once
    fn max_concurrency(&self) -> usize {
        1
    }

    /// Produce an artifact
    async fn export(&self, request: &ExportRequest) -> Result<ExportResult>;

    /// Consume an artifact
    async fn import(&self, request: &ImportRequest) -> Result<ImportResult>;
}
