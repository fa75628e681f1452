//! Shared leaf crate for packagefs.
//!
//! Holds everything both the core library and external tooling need to
//! agree on: the error taxonomy, filesystem constants, and the byte-level
//! control-channel formats (activation change requests, volume and package
//! info records).

pub mod constants;
pub mod control;
pub mod errors;

pub use errors::{PackageFsError, PackageFsResult};
