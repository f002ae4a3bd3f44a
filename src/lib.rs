#![forbid(unsafe_code)]

//! Shared library for the Baluflix backend binary.
//!
//! The interesting part lives in [`range`] and [`stream`]: a single
//! byte-range streaming implementation shared by every media endpoint, so
//! no route ever grows its own header parsing or chunking. The rest is
//! glue: catalog reads, config resolution and startup checks.

pub mod catalog;
pub mod config;
pub mod media_type;
pub mod range;
pub mod startup;
pub mod stream;
