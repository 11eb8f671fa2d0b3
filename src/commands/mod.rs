//! Instruction executors.
//!
//! The 17 Dockerfile verbs form one closed [`Command`] enum dispatched by
//! match over a fixed capability set: execute, snapshot-file reporting,
//! canonical text, cache substitution, context usage. Keeping the dispatch
//! in one place avoids an implicit inheritance tree; the per-verb logic
//! lives in the submodules.

mod add;
mod cached;
mod copy;
mod metadata;
mod run;
mod user;
mod workdir;

pub use cached::CachedCommand;
pub use user::{lookup_group, lookup_user, resolve_user_spec};

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::dockerfile::{BuildArgs, Instruction};
use crate::error::Result;
use crate::fsutil::Filesystem;
use crate::image::{Config, Image};

/// Everything an executor may touch besides the image config.
pub struct ExecEnv<'a> {
    /// The build root (normally `/`).
    pub fs: &'a Filesystem,
    /// Root of the unpacked build context.
    pub context_root: PathBuf,
    /// Builder state directory; `COPY --from=<n>` reads `<work_dir>/<n>`.
    pub work_dir: PathBuf,
}

impl ExecEnv<'_> {
    /// Source root a COPY resolves against: the saved filesystem of a prior
    /// stage when `--from` is given, the build context otherwise.
    fn copy_source_root(&self, from: Option<&str>) -> PathBuf {
        match from {
            Some(index) => self.work_dir.join(index),
            None => self.context_root.clone(),
        }
    }
}

/// One executable build step.
#[derive(Debug, Clone)]
pub enum Command {
    Run(run::RunCommand),
    Copy(copy::CopyCommand),
    Add(add::AddCommand),
    Workdir(workdir::WorkdirCommand),
    User(user::UserCommand),
    Meta(metadata::MetadataCommand),
    Cached(CachedCommand),
}

impl Command {
    /// Builds the executor for a parsed instruction. `FROM` is handled by
    /// the coordinator and never reaches here; `MAINTAINER` is deprecated
    /// and skipped with a warning.
    pub fn from_instruction(instruction: &Instruction) -> Result<Option<Command>> {
        let text = instruction.text();
        Ok(Some(match instruction {
            Instruction::From { .. } => return Ok(None),
            Instruction::Maintainer(_) => {
                warn!("MAINTAINER is deprecated, skipping");
                return Ok(None);
            }
            Instruction::Run {
                cmdline,
                prepend_shell,
            } => Command::Run(run::RunCommand::new(cmdline.clone(), *prepend_shell, text)),
            Instruction::Copy {
                sources,
                dest,
                from,
                chown,
            } => Command::Copy(copy::CopyCommand::new(
                sources.clone(),
                dest.clone(),
                from.clone(),
                chown.clone(),
                text,
            )),
            Instruction::Add {
                sources,
                dest,
                chown,
            } => Command::Add(add::AddCommand::new(
                sources.clone(),
                dest.clone(),
                chown.clone(),
                text,
            )),
            Instruction::Workdir(path) => {
                Command::Workdir(workdir::WorkdirCommand::new(path.clone(), text))
            }
            Instruction::User(user) => Command::User(user::UserCommand::new(user.clone(), text)),
            other => Command::Meta(metadata::MetadataCommand::new(other.clone(), text)),
        }))
    }

    /// Runs the instruction, mutating config, build args, and/or the build
    /// root.
    pub fn execute(
        &mut self,
        config: &mut Config,
        args: &mut BuildArgs,
        env: &ExecEnv<'_>,
    ) -> Result<()> {
        match self {
            Command::Run(c) => c.execute(config, args, env),
            Command::Copy(c) => c.execute(config, args, env),
            Command::Add(c) => c.execute(config, args, env),
            Command::Workdir(c) => c.execute(config, args, env),
            Command::User(c) => c.execute(config, args, env),
            Command::Meta(c) => c.execute(config, args, env),
            Command::Cached(c) => c.execute(env),
        }
    }

    /// Paths to snapshot after execution. `None` means "diff the whole
    /// filesystem"; an empty list means "metadata only, nothing to layer".
    pub fn files_to_snapshot(&self) -> Option<Vec<PathBuf>> {
        match self {
            Command::Run(_) => None,
            Command::Copy(c) => Some(c.snapshot_files()),
            Command::Add(c) => Some(c.snapshot_files()),
            Command::Workdir(c) => Some(c.snapshot_files()),
            Command::User(_) => Some(Vec::new()),
            Command::Meta(c) => Some(c.snapshot_files()),
            Command::Cached(c) => Some(c.snapshot_files()),
        }
    }

    /// Canonical one-line form: history `created_by` and cache-key input.
    pub fn text(&self) -> String {
        match self {
            Command::Run(c) => c.text().to_string(),
            Command::Copy(c) => c.text().to_string(),
            Command::Add(c) => c.text().to_string(),
            Command::Workdir(c) => c.text().to_string(),
            Command::User(c) => c.text().to_string(),
            Command::Meta(c) => c.text().to_string(),
            Command::Cached(c) => c.text().to_string(),
        }
    }

    /// Whether this step's output layer is worth caching (and probing for).
    pub fn is_cacheable(&self) -> bool {
        matches!(self, Command::Run(_))
    }

    /// The substitute executor to run instead when the layer cache holds
    /// this step's output. `None` for steps that are not worth caching.
    pub fn cache_command(&self, cached_layer: Image) -> Option<Command> {
        match self {
            Command::Run(c) => Some(Command::Cached(CachedCommand::new(
                cached_layer,
                c.text().to_string(),
            ))),
            _ => None,
        }
    }

    /// Whether this step reads files from the build context.
    pub fn uses_context(&self) -> bool {
        match self {
            Command::Copy(c) => c.uses_context(),
            Command::Add(_) => true,
            _ => false,
        }
    }

    /// Whether this step needs the base image extracted on disk.
    pub fn requires_unpacked_fs(&self) -> bool {
        matches!(
            self,
            Command::Run(_) | Command::User(_) | Command::Copy(_) | Command::Add(_)
        )
    }

    /// Context files feeding the composite cache key, resolved the same way
    /// execution will resolve them.
    pub fn files_used_from_context(
        &self,
        config: &Config,
        args: &BuildArgs,
        env: &ExecEnv<'_>,
    ) -> Result<Vec<PathBuf>> {
        match self {
            Command::Copy(c) => c.files_used_from_context(config, args, env),
            Command::Add(c) => c.files_used_from_context(config, args, env),
            _ => Ok(Vec::new()),
        }
    }
}

/// Resolves a `--chown` value (`user[:group]`, names or ids) to a uid/gid
/// pair against the build root's passwd/group files. Defaults to root.
fn resolve_ownership(chown: Option<&str>, envs: &[String], root: &Path) -> Result<(u32, u32)> {
    match chown {
        Some(spec) => {
            let spec = crate::resolve::resolve_environment_replacement(spec, envs, false)?;
            resolve_user_spec(&spec, root)
        }
        None => Ok((0, 0)),
    }
}
