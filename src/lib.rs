//! # strata
//!
//! **Daemonless container image builder**
//!
//! Builds OCI/Docker v2 images from a Dockerfile and a build context by
//! executing each instruction directly against the host's filesystem,
//! snapshotting changed files into layers, and assembling the result
//! without a container runtime or privileged daemon.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                            strata                                   │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  builder::do_build                                                  │
//! │  ├── dockerfile   parse → stages, meta-args, name→index resolution  │
//! │  ├── StageBuilder (one per stage)                                   │
//! │  │     unpack base → execute instruction → snapshot → append layer  │
//! │  │          │                │                 │                    │
//! │  │     fsutil (whitelist) commands (17 verbs) snapshot (LayeredMap) │
//! │  ├── cache        composite keys → local dir / registry repo        │
//! │  └── registry     pull bases, push cached layers                    │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  image            config + layers, manifests, digests, tarballs     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Execution Model
//!
//! The engine is single-threaded and sequential along the Dockerfile
//! instruction order: every filesystem effect and config mutation of an
//! earlier instruction is observable to later ones, and layers are appended
//! strictly in instruction order. The root filesystem (`/` for real builds,
//! any scratch directory in tests) is transient process-wide state:
//! populated from the base image at stage start, mutated by instructions,
//! and wiped between stages so no stage sees its predecessor's residue.
//!
//! A [`CancelToken`](options::CancelToken) aborts an in-flight build at the
//! next suspension point; layers already pushed to the cache are kept
//! (keys are idempotent), partial snapshots are discarded.
//!
//! # Example
//!
//! ```rust,ignore
//! use strata::{do_build, BuildOptions};
//!
//! let image = do_build(&BuildOptions {
//!     dockerfile_path: "Dockerfile".into(),
//!     src_context: "/workspace".into(),
//!     ..Default::default()
//! })?;
//! println!("built {}", image.digest()?);
//! ```

pub mod builder;
pub mod cache;
pub mod commands;
pub mod constants;
pub mod dockerfile;
pub mod error;
pub mod fsutil;
pub mod image;
pub mod options;
pub mod registry;
pub mod resolve;
pub mod snapshot;

pub use builder::{do_build, BuildStage, StageBuilder};
pub use error::{Error, Result};
pub use image::Image;
pub use options::{BuildOptions, CancelToken, SnapshotMode};
