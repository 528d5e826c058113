// src/lib.rs

pub mod aggregate;
pub mod allocate;
pub mod catalog;
pub mod config;
pub mod dialect;
pub mod error;
pub mod invoice;
pub mod normalize;
pub mod package;
pub mod pdf_extract;
pub mod pipeline;
pub mod resolver;
pub mod sheet;

pub use error::{Diagnostic, PipelineError};
pub use pipeline::{BatchOutcome, BatchRequest, run_batch};
