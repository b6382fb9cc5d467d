// Library interface for novel_parser
// The binary and the integration tests use the extraction pipeline through here

pub mod browser;
pub mod challenge;
pub mod config;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod sources;
pub mod storage_state;
pub mod text;

pub use crate::config::{ExtractionConfig, ParseRequest, ServiceConfig};
pub use crate::error::{ExtractError, Phase};
pub use crate::models::{Book, Chapter, ChapterRef, ParseResult, Site};
pub use crate::orchestrator::{spawn_extract, Extractor};
