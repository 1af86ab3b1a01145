//! # propfleet
//!
//! Partition a data set of physical properties across independent worker
//! processes, estimate each slice on its own accelerator through a
//! queue-backed calculation backend, and merge the per-worker results.
//!
//! ## Architectural Philosophy
//!
//! The library keeps the three-layer split of data, runtime and procedures:
//!
//! - **[`core`]: The Foundation.** Data models, the partitioner, resource
//!   descriptors and the on-disk result formats. Nothing here talks to the network
//!   or the scheduler.
//!
//! - **[`engine`]: The Runtime.** Calculation backends (local and SLURM), the
//!   estimation server and its client, result storage and progress reporting.
//!
//! - **[`workflows`]: The Public API.** The per-worker estimation run and the
//!   result merge, as invoked by the command-line tool.

pub mod core;
pub mod engine;
pub mod workflows;
