//! Core types and utilities for transfer-learning image classifiers.
//!
//! This crate provides the error type, run configuration, backbone
//! enumeration and device selection shared by the dataset, training and
//! tool crates.

pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod types;

pub use backend::*;
pub use cli::*;
pub use config::*;
pub use error::{Error, Result};
pub use types::*;
