//! Shared types, error model, and configuration for docimport.
//!
//! This crate is the foundation depended on by all other docimport crates.
//! It provides:
//! - [`ImportError`], the unified error type
//! - Plan and result types ([`ImportManifest`], [`DocumentPlanItem`], [`ImportResult`])
//! - Configuration ([`AppConfig`], config loading and env overrides)
//! - The [`SourceAdapter`] trait markdown trees are read through

pub mod config;
pub mod error;
pub mod source;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, FeishuConfig, HttpConfig, ImportDefaults, LlmConfig, config_dir, config_file_path,
    init_config, load_config, load_config_from,
};
pub use error::{INVALID_PARAM_CODE, ImportError, Result};
pub use source::{SourceAdapter, SourceDocument};
pub use types::{
    CreatedDocRecord, DocumentPlanItem, ImportFailure, ImportManifest, ImportResult,
    LlmFallbackMode, RunId, SkippedItem, StructureOrder, WorkerResult, WriteMode,
};
