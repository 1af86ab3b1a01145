//! # Workflows Module
//!
//! End-to-end procedures built from the [`core`](crate::core) data model and the
//! [`engine`](crate::engine) runtime. These are the entry points used by the
//! command-line front end.
//!
//! - **Estimation** ([`estimate`]) - One worker's run: resume check, partitioning,
//!   uncertainty policy, force-field bundling, backend and server lifetime, request
//!   submission and result persistence. The returned [`estimate::WorkerOutcome`]
//!   distinguishes full success, partial success and failure.
//! - **Merge** ([`merge`]) - Collecting the per-worker result files of a run into a
//!   single mapping.

pub mod estimate;
pub mod merge;
