//! Constants for the build engine.
//!
//! Paths, media types, and fixed defaults live here so the rest of the
//! codebase stays free of magic values.

// =============================================================================
// Filesystem Layout
// =============================================================================

/// Root the build executes against. Overridable via
/// [`BuildOptions::root_dir`](crate::options::BuildOptions) for tests.
pub const ROOT_DIR: &str = "/";

/// Working directory of the builder itself. Never snapshotted, never deleted.
pub const STRATA_DIR: &str = "/strata";

/// Directory holding the tarballs of saved intermediate stages.
pub const INTERMEDIATE_STAGES_DIR: &str = "/strata/stages";

/// Directory an object-storage build context is unpacked into.
pub const BUILD_CONTEXT_DIR: &str = "/strata/buildcontext";

/// Paths that are never written during extraction and never removed when the
/// filesystem is reset between stages. Kernel mounts plus our own state.
pub const FS_WHITELIST: &[&str] = &[
    "/strata",
    "/proc",
    "/sys",
    "/dev",
    "/etc/mtab",
    "/var/run",
];

// =============================================================================
// Image Defaults
// =============================================================================

/// History author recorded on layers we create.
pub const AUTHOR: &str = "strata";

/// Environment seeded into an image built `FROM scratch`.
pub const SCRATCH_ENV: &[&str] =
    &["PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin"];

/// Base name that means "no base image at all".
pub const NO_BASE_IMAGE: &str = "scratch";

/// Shell prepended to shell-form RUN/CMD/ENTRYPOINT when the config has none.
pub const DEFAULT_SHELL: &[&str] = &["/bin/sh", "-c"];

// =============================================================================
// Snapshotting
// =============================================================================

/// A tar at or below this size contains no entries (two zero blocks plus
/// gzip framing slack) and is treated as an empty snapshot.
pub const EMPTY_TAR_SIZE: u64 = 1024;

/// Prefix of a whiteout entry name in a layer tar.
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// Marker entry that empties a directory before its siblings apply.
pub const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";

// =============================================================================
// Media Types
// =============================================================================

/// Docker schema-2 image config media type.
pub const CONFIG_MEDIA_TYPE: &str = "application/vnd.docker.container.image.v1+json";

/// Docker schema-2 manifest media type.
pub const MANIFEST_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// Gzipped layer media type.
pub const LAYER_MEDIA_TYPE: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

// =============================================================================
// Registry
// =============================================================================

/// Transport-level timeout applied to each registry operation.
pub const REGISTRY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(300);

/// Attempts per registry operation before the error surfaces.
pub const REGISTRY_RETRIES: u32 = 3;

// =============================================================================
// Caching
// =============================================================================

/// Tag prefix applied to layers pushed to a registry-backed cache repo.
pub const CACHE_TAG_PREFIX: &str = "cache-";

// =============================================================================
// Snapshot Modes
// =============================================================================

/// Hash file mode, mtime, ownership, and content.
pub const SNAPSHOT_MODE_FULL: &str = "full";

/// Hash mtime only. Faster, can miss same-second modifications.
pub const SNAPSHOT_MODE_TIME: &str = "time";
