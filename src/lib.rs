//! gazeval - Eye-tracker validation analysis
//!
//! gazeval turns eye-tracker validation recordings into de-identified tables
//! and spatial accuracy maps through a deterministic pipeline: record import →
//! anonymization → metric recomputation → table flattening → spatial binning
//! → cross-session aggregation.
//!
//! ## Modules
//!
//! - **Import**: [`record`], [`anonymize`], [`recompute`] and [`loader`] read
//!   session records into the session, target and sample relations ([`tables`])
//! - **Matrices**: [`binning`] places per-target metrics on an angular lattice,
//!   [`aggregate`] combines the lattices of many sessions

pub mod aggregate;
pub mod anonymize;
pub mod binning;
pub mod config;
pub mod error;
pub mod loader;
pub mod matrix;
pub mod pipeline;
pub mod recompute;
pub mod record;
pub mod stats;
pub mod tables;
pub mod types;

pub use aggregate::{aggregate_matrices, aggregate_matrices_with};
pub use anonymize::{Anonymizer, ParticipantEntry, ParticipantRegistry};
pub use binning::{fill_target_matrix, BinningConfig};
pub use config::AnalysisConfig;
pub use error::AnalysisError;
pub use loader::ValidationLoader;
pub use matrix::{DepthPlane, Measure, TargetMatrix};
pub use pipeline::{aggregate_sessions, import_folders, session_matrices, GazeProcessor};
pub use recompute::{AngularRecomputer, MetricsRecomputer, MetricsResult, RecomputeConfig};
pub use stats::Reduction;
pub use tables::{BatchManifest, ValidationTables};

/// gazeval version recorded in every batch manifest
pub const GAZEVAL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name recorded in every batch manifest
pub const PRODUCER_NAME: &str = "gazeval";
