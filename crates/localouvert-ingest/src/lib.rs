//! LocalOuvert Ingest Library
//!
//! Generic aggregation engine for French public open-data files: takes a
//! listing of heterogeneous remote files, downloads and normalizes each one
//! exactly once, records per-file failures, and unions the survivors into a
//! single parquet dataset.
//!
//! # Components
//!
//! - [`loaders`]: format tag to decoder registry (CSV, JSON, Parquet, XML, ZIP)
//! - [`fetch`]: content loader with retry and backoff
//! - [`normalize`]: per-file normalizer extension point and frame transforms
//! - [`aggregator`]: the engine, using on-disk artifacts as its ledger
//! - [`combine`]: streaming column-union writer
//!
//! # Example
//!
//! ```no_run
//! use localouvert_common::config::{AggregatorConfig, HttpConfig};
//! use localouvert_ingest::{Aggregator, FileDescriptor, FileList, LoaderRegistry, TabularNormalizer};
//!
//! fn main() -> anyhow::Result<()> {
//!     let files = FileList::new(vec![
//!         FileDescriptor::new("https://www.data.gouv.fr/fr/datasets/r/5a2f.csv", "csv"),
//!     ]);
//!     let config = AggregatorConfig::new("./data/subventions", "./data/subventions.parquet");
//!     let normalizer = TabularNormalizer::new().with_metadata_columns(["url"]);
//!
//!     let mut aggregator = Aggregator::new(
//!         files,
//!         &config,
//!         &HttpConfig::default(),
//!         LoaderRegistry::with_defaults(),
//!         normalizer,
//!     )?;
//!     let report = aggregator.run()?;
//!     println!("{} files normalized", report.normalized);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod aggregator;
pub mod artifact;
pub mod combine;
pub mod descriptor;
pub mod error;
pub mod error_log;
pub mod fetch;
pub mod frame;
pub mod loaders;
pub mod normalize;
pub mod progress;

pub use aggregator::{AggregationStatus, Aggregator, RunReport, RunStatus};
pub use descriptor::{FileDescriptor, FileList};
pub use error::{AggregateError, FileError, Result};
pub use error_log::ErrorLog;
pub use frame::Frame;
pub use loaders::{LoadOptions, Loader, LoaderRegistry};
pub use normalize::{Normalizer, RawArtifact, TabularNormalizer};
