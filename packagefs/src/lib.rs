//! packagefs — a read-only union filesystem over package archives.
//!
//! A mounted [`Volume`] loads the set of currently activated package
//! archives from a packages directory, unions their contents into a single
//! node tree, and serves lookup/stat/read/readdir/readlink and attribute
//! reads from that tree. Activation can change at runtime: packages are
//! added, removed or replaced in batches, and the visible tree mutates
//! accordingly with live change notifications through the [`vfs::VfsBridge`]
//! seam.
//!
//! Layering, low to high:
//! - [`package`]: the in-memory model of one archive (entry tree, metadata,
//!   resolvables/dependencies) plus the archive codec seam.
//! - [`node`]: the visible tree — directories, unpacking nodes, iterators.
//! - [`volume`]: one mount; node table, hook surface, activation manager.
//! - [`root`]: the process-wide grouping of volumes plus package links.

pub mod config;
pub mod index;
pub mod listener;
pub mod node;
pub mod package;
pub mod query;
pub mod root;
pub mod vfs;
pub mod volume;

pub use config::{MountOptions, ShineThrough};
pub use packagefs_shared::control::MountType;
pub use packagefs_shared::{PackageFsError, PackageFsResult};
pub use volume::Volume;
