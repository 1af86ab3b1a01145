//! # Engine Module
//!
//! The runtime that turns a request into estimates.
//!
//! ## Overview
//!
//! A worker process hosts an [`server::EvaluatorServer`] in front of a
//! [`backend::CalculationBackend`]. The process's own [`client::EvaluatorClient`]
//! submits the worker's partition over TCP and polls for the result while the
//! backend runs tasks, either in-process ([`backend::local`]) or as SLURM jobs
//! ([`backend::slurm`]), each bound to a single accelerator.
//!
//! ## Architecture
//!
//! - **Configuration** ([`config`]) - Builders for backend, server and worker settings
//! - **Backends** ([`backend`]) - Lifecycle, worker pool and queue integration
//! - **Estimators** ([`estimator`]) - The engine invocation contract
//! - **Server and client** ([`server`], [`client`], [`protocol`]) - Request
//!   submission, status polling and the framed JSON wire format
//! - **Storage** ([`storage`]) - Content-addressed reuse of earlier estimates
//! - **Progress Monitoring** ([`progress`]) - Callback-based progress events
//! - **Error Handling** ([`error`]) - The engine error taxonomy

pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod estimator;
pub mod progress;
pub mod protocol;
pub mod server;
pub mod storage;
