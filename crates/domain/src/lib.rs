//! `nw-domain`: shared configuration and error types for the nodewire
//! chain-connectivity layer.
//!
//! Every other crate in the workspace depends on this one for its
//! configuration sections and for the common [`Error`](error::Error) used on
//! configuration and local-storage paths.

pub mod config;
pub mod error;

pub use error::{Error, Result};
