//! civitai-fetch - Batch downloader for favorited Civitai models
//!
//! This library lists a user's favorited models, picks one file per latest
//! version, and downloads the files concurrently. Runs are resumable: a state
//! file records which versions are complete, and correctly-sized files on
//! disk are never fetched again.
//!
//! # Modules
//!
//! - [`catalog`]: listing endpoint client and wire types
//! - [`select`]: file selection policy
//! - [`download`]: transfers, retries and the worker pool
//! - [`state`]: persisted download records
//! - [`layout`]: on-disk placement
//! - [`config`]: INI configuration
//! - [`organize`]: sorting model ids into per-type link files
//! - [`app`]: end-to-end runs
//! - [`logging`]: tracing subscriber setup

pub mod app;
pub mod catalog;
pub mod config;
pub mod download;
pub mod layout;
pub mod logging;
pub mod organize;
pub mod select;
pub mod state;

pub use app::{FetchApp, FetchError, FetchReport, OrganizeReport};
pub use config::{ConfigFile, FetchConfig};
