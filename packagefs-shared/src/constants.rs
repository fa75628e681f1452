//! Constants shared by the packagefs crates.
//!
//! Centralized location for reserved names, administrative paths, and
//! request limits. The volume and the CLI both rely on these; keep them in
//! one place.

/// Node id values with special meaning.
pub mod node_ids {
    /// Unset / not-yet-assigned node id.
    pub const UNSET: u64 = 0;

    /// The root directory of every volume.
    pub const ROOT: u64 = 1;

    /// First id handed out by the allocator.
    pub const FIRST_ALLOCATED: u64 = 2;
}

/// On-disk layout of a packages directory.
pub mod layout {
    /// Administrative subdirectory of a packages directory.
    pub const ADMINISTRATIVE_DIRECTORY: &str = "administrative";

    /// Activation file name (inside the administrative directory).
    pub const ACTIVATION_FILE: &str = "activated-packages";

    /// Activation file path relative to the packages directory.
    pub const ACTIVATION_FILE_PATH: &str = "administrative/activated-packages";

    /// Prefix of archived packages-state directories.
    pub const STATE_DIRECTORY_PREFIX: &str = "state_";

    /// Extension of package archives.
    pub const PACKAGE_FILE_EXTENSION: &str = ".hpkg";
}

/// Reserved names inside package archives and the visible tree.
pub mod names {
    /// Package metadata entry; part of the archive, never part of the
    /// visible content. Exactly this name, case-sensitive.
    pub const PACKAGE_INFO_FILE: &str = ".PackageInfo";

    /// Self symlink inside a package link directory.
    pub const SELF_LINK: &str = ".self";

    /// Symlink target used when a dependency is unresolved.
    pub const UNKNOWN_LINK_TARGET: &str = "?";

    /// Name of the package links directory on the system volume.
    pub const PACKAGE_LINKS_DIRECTORY: &str = "package-links";

    /// Auto-generated attribute carrying the owning package's file name.
    pub const PACKAGE_FILE_ATTRIBUTE: &str = "SYS:PACKAGE_FILE";

    /// Maximum file name length accepted anywhere in the tree.
    pub const MAX_FILE_NAME: usize = 255;
}

/// Request and file size sanity limits.
pub mod limits {
    /// Maximum accepted size of an activation change request.
    pub const MAX_ACTIVATION_REQUEST_SIZE: usize = 10 * 1024 * 1024;

    /// Maximum accepted size of an activation file.
    pub const MAX_ACTIVATION_FILE_SIZE: u64 = 10 * 1024 * 1024;
}

/// Shine-through directories bound over the read-only tree, by mount type.
pub mod shine_through {
    /// Directories shone through for system and home mounts.
    pub const DIRECTORIES: &[&str] = &["cache", "non-packaged", "packages", "settings", "var"];
}

/// Values reported by `read_fs_info`.
pub mod fs_info {
    /// Reported block size.
    pub const BLOCK_SIZE: u32 = 4096;

    /// Optimal I/O size reported to the host.
    pub const OPTIMAL_IO_SIZE: u32 = 64 * 1024;
}
