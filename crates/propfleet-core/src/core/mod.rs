//! # Core Module
//!
//! Stateless building blocks shared by every other layer.
//!
//! - **Data model** ([`models`]) - Physical properties, data sets, estimation requests
//!   and results, including the keyed form written to disk.
//! - **Partitioning** ([`partition`]) - The deterministic split of a data set into
//!   contiguous per-worker slices.
//! - **Resources** ([`resources`]) - Queue resource templates and the per-worker
//!   [`ResourceDescriptor`](resources::ResourceDescriptor) with its accelerator binding.
//! - **Force fields and options** ([`forcefield`], [`options`]) - The artifacts a
//!   request carries to the engine unmodified.
//! - **Persistence** ([`io`]) - Worker result files, the completion marker and the
//!   multi-file merge.

pub mod forcefield;
pub mod io;
pub mod models;
pub mod options;
pub mod partition;
pub mod resources;
