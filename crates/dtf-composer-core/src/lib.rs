//! Core library for composing DTF print bases.
//!
//! - Sizing: SKU-prefix profiles project artwork into target print widths under machine constraints
//! - Packing: skyline placement onto fixed-width bases, in picklist (`sequence`) or area-sorted (`optimize`) order
//! - Rendering: one millimeter-exact RGBA page per base, encoded as PNG
//! - Pipeline: `compose_job` drives sizing → packing → rendering and writes artifacts plus an auditable manifest
//!
//! Quick example:
//! ```ignore
//! use dtf_composer_core::prelude::*;
//!
//! let cfg = ComposeConfig::builder()
//!     .machine(600.0, 2500.0, 300)
//!     .mode(PackMode::Sequence)
//!     .build();
//! let spec = JobSpec::new("acme", "job-1", items, profiles, cfg);
//! let store = FsStorage::new("data");
//! let outcome = compose_job(&spec, &store, &CancelToken::new());
//! println!("{:?}: {} bases", outcome.status, outcome.manifest.packing.total_bases);
//! ```

pub mod config;
pub mod error;
pub mod manifest;
pub mod model;
pub mod packer;
pub mod pipeline;
pub mod render;
pub mod sizing;
pub mod storage;

pub use config::*;
pub use error::*;
pub use manifest::*;
pub use model::*;
pub use packer::*;
pub use pipeline::*;
pub use storage::*;

/// Convenience prelude for common types and functions.
/// Importing `dtf_composer_core::prelude::*` brings the primary APIs into scope.
pub mod prelude {
    pub use crate::config::{ComposeConfig, ComposeConfigBuilder, Machine, Margins, PackMode};
    pub use crate::error::{ComposeError, Result};
    pub use crate::manifest::{Manifest, SizingReport};
    pub use crate::model::{Base, PackLayout, Placement, RectMm, ResolvedItem, SizedItem};
    pub use crate::pipeline::{
        compose_job, compose_layout, CancelToken, JobOutcome, JobSpec, JobStatus, LayoutOutput,
    };
    pub use crate::sizing::{ProfileSet, SizingProfile};
    pub use crate::storage::{FsStorage, MemStorage, RetryPolicy, Storage};
}
