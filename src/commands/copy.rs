//! COPY: move files from the build context (or a prior stage's saved
//! filesystem) into the image.

use std::path::{Path, PathBuf};

use tracing::info;

use super::ExecEnv;
use crate::dockerfile::BuildArgs;
use crate::error::{Error, Result};
use crate::fsutil;
use crate::image::Config;
use crate::resolve;

#[derive(Debug, Clone)]
pub struct CopyCommand {
    sources: Vec<String>,
    dest: String,
    from: Option<String>,
    chown: Option<String>,
    text: String,
    snapshot_files: Vec<PathBuf>,
}

impl CopyCommand {
    pub fn new(
        sources: Vec<String>,
        dest: String,
        from: Option<String>,
        chown: Option<String>,
        text: String,
    ) -> Self {
        Self {
            sources,
            dest,
            from,
            chown,
            text,
            snapshot_files: Vec::new(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn uses_context(&self) -> bool {
        self.from.is_none()
    }

    pub fn snapshot_files(&self) -> Vec<PathBuf> {
        self.snapshot_files.clone()
    }

    pub fn execute(
        &mut self,
        config: &mut Config,
        args: &mut BuildArgs,
        env: &ExecEnv<'_>,
    ) -> Result<()> {
        info!(sources = ?self.sources, dest = %self.dest, "cmd: COPY");
        let envs = args.replacement_envs(&config.env);
        let source_root = env.copy_source_root(self.from.as_deref());

        let (resolved_sources, dest) = resolve_copy_sources(
            &self.sources,
            &self.dest,
            &envs,
            &source_root,
        )?;

        let cwd = working_dir(config);
        let (uid, gid) = super::resolve_ownership(self.chown.as_deref(), &envs, env.fs.root())?;

        for src in &resolved_sources {
            let full_src = source_root.join(src);
            if full_src.is_dir() {
                // A directory source contributes its contents, not itself.
                let dest_dir = absolute_dest(&dest, &cwd);
                for file in fsutil::files_under(&full_src)? {
                    let rel = file.strip_prefix(&full_src).unwrap_or(&file);
                    if rel.as_os_str().is_empty() {
                        continue;
                    }
                    let target = format!("{}/{}", dest_dir.trim_end_matches('/'), rel.display());
                    let target = resolve::clean_path(&target);
                    self.copy_one(&file, &target, uid, gid, env)?;
                }
            } else {
                let target = if dest_is_directory(&dest, env, &cwd) {
                    resolve::destination_filepath(src, &ensure_dir(&dest), &cwd)?
                } else {
                    resolve::destination_filepath(src, &dest, &cwd)?
                };
                self.copy_one(&full_src, &target, uid, gid, env)?;
            }
        }
        Ok(())
    }

    fn copy_one(
        &mut self,
        src: &Path,
        image_dest: &str,
        uid: u32,
        gid: u32,
        env: &ExecEnv<'_>,
    ) -> Result<()> {
        let disk_dest = env.fs.resolve(image_dest);
        if src.is_dir() {
            std::fs::create_dir_all(&disk_dest).map_err(|e| Error::fs(&disk_dest, e))?;
        } else {
            fsutil::copy_path(src, &disk_dest, uid, gid)?;
        }
        self.snapshot_files.push(disk_dest);
        Ok(())
    }

    /// Context files that feed the cache key: the resolved sources, as
    /// absolute paths into the context.
    pub fn files_used_from_context(
        &self,
        config: &Config,
        args: &BuildArgs,
        env: &ExecEnv<'_>,
    ) -> Result<Vec<PathBuf>> {
        if !self.uses_context() {
            return Ok(Vec::new());
        }
        let envs = args.replacement_envs(&config.env);
        let (resolved_sources, _) =
            resolve_copy_sources(&self.sources, &self.dest, &envs, &env.context_root)?;
        Ok(resolved_sources
            .iter()
            .map(|src| env.context_root.join(src))
            .collect())
    }
}

/// Env-resolves sources and destination, expands globs, validates arity.
pub fn resolve_copy_sources(
    sources: &[String],
    dest: &str,
    envs: &[String],
    source_root: &Path,
) -> Result<(Vec<String>, String)> {
    let mut srcs_and_dest: Vec<String> = sources.to_vec();
    srcs_and_dest.push(dest.to_string());
    let srcs_and_dest =
        resolve::resolve_environment_replacement_list(&srcs_and_dest, envs, true)?;

    let resolved_sources = resolve::resolve_sources(&srcs_and_dest, source_root)?;
    resolve::is_srcs_valid(&srcs_and_dest, &resolved_sources, source_root)?;

    let dest = srcs_and_dest[srcs_and_dest.len() - 1].clone();
    Ok((resolved_sources, dest))
}

/// Whether the destination names a directory: written dir-ish, or already a
/// directory on disk.
fn dest_is_directory(dest: &str, env: &ExecEnv<'_>, cwd: &str) -> bool {
    if resolve::is_dest_dir(dest) {
        return true;
    }
    let absolute = if dest.starts_with('/') {
        dest.to_string()
    } else {
        resolve::clean_path(&format!("{cwd}/{dest}"))
    };
    env.fs.resolve(&absolute).is_dir()
}

pub fn working_dir(config: &Config) -> String {
    if config.working_dir.is_empty() {
        "/".to_string()
    } else {
        config.working_dir.clone()
    }
}

fn ensure_dir(dest: &str) -> String {
    if dest.ends_with('/') || dest == "." {
        dest.to_string()
    } else {
        format!("{dest}/")
    }
}

/// Absolute image-space form of a destination, anchored at `cwd` when
/// relative.
fn absolute_dest(dest: &str, cwd: &str) -> String {
    if dest.starts_with('/') {
        resolve::clean_path(dest)
    } else {
        resolve::clean_path(&format!("{cwd}/{dest}"))
    }
}
