//! callsync - call log metadata sync and chunked recording upload
//!
//! This crate provides the core functionality for the `callsync` CLI tool.
//!
//! # Architecture
//!
//! - [`cli`] - Command-line interface using clap
//! - [`model`] - Data types (CallRecord, PersonRecord, PlanInfo)
//! - [`storage`] - SQLite local store
//! - [`config`] - Path resolution, engine tunables, device settings
//! - [`capture`] - Call log import keyed by composite id
//! - [`identity`] - Device-specific caller identity resolution
//! - [`remote`] - Remote sync service contract and HTTP client
//! - [`sync`] - Metadata sync engine
//! - [`upload`] - Recording upload engine
//! - [`scheduler`] - Periodic and on-demand background work
//! - [`error`] - Error types and handling

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cancel;
pub mod capture;
pub mod cli;
pub mod config;
pub mod error;
pub mod identity;
pub mod model;
pub mod remote;
pub mod scheduler;
pub mod storage;
pub mod sync;
pub mod upload;

pub use error::{Error, Result};
