//! Persistence of worker results: the per-worker snapshot and keyed JSON
//! files, the completion marker consulted on re-runs, and the merge of many
//! workers' files into one mapping.

pub(crate) mod fs;
pub mod merge;
pub mod resume;
pub mod snapshot;
