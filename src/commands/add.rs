//! ADD: COPY plus remote URLs and local tar extraction.
//!
//! Remote sources are downloaded with mode 0600 (mtime from the
//! `Last-Modified` header when present) and are never extracted, even when
//! the payload is a tarball. Local sources that sniff as tar archives are
//! unpacked into the destination as `tar -x` would. Everything else is
//! delegated to a plain COPY.

use std::path::PathBuf;

use tracing::{debug, info};

use super::copy::{resolve_copy_sources, working_dir, CopyCommand};
use super::ExecEnv;
use crate::dockerfile::BuildArgs;
use crate::error::Result;
use crate::fsutil;
use crate::image::Config;
use crate::resolve;

#[derive(Debug, Clone)]
pub struct AddCommand {
    sources: Vec<String>,
    dest: String,
    chown: Option<String>,
    text: String,
    snapshot_files: Vec<PathBuf>,
}

impl AddCommand {
    pub fn new(sources: Vec<String>, dest: String, chown: Option<String>, text: String) -> Self {
        Self {
            sources,
            dest,
            chown,
            text,
            snapshot_files: Vec::new(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
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
        info!(sources = ?self.sources, dest = %self.dest, "cmd: ADD");
        let envs = args.replacement_envs(&config.env);
        let (resolved_sources, dest) =
            resolve_copy_sources(&self.sources, &self.dest, &envs, &env.context_root)?;
        let cwd = working_dir(config);

        let mut plain_sources = Vec::new();
        for src in resolved_sources {
            if resolve::is_src_remote_file_url(&src) {
                let url_dest = resolve::url_destination_filepath(&src, &dest, &cwd);
                info!(url = %src, dest = %url_dest, "adding remote file");
                let disk_dest = env.fs.resolve(&url_dest);
                fsutil::download_file_to_dest(&src, &disk_dest)?;
                self.snapshot_files.push(disk_dest);
                continue;
            }

            let full_src = env.context_root.join(&src);
            if full_src.is_file() && fsutil::local_tar_archive_kind(&full_src).is_some() {
                let unpack_dest = if dest.starts_with('/') {
                    resolve::clean_path(&dest)
                } else {
                    resolve::clean_path(&format!("{cwd}/{dest}"))
                };
                info!(archive = %src, dest = %unpack_dest, "unpacking local tar archive");
                let disk_dest = env.fs.resolve(&unpack_dest);
                let unpacked = fsutil::unpack_local_tar_archive(&full_src, &disk_dest)?;
                debug!(files = unpacked.len(), "unpacked archive entries");
                self.snapshot_files.extend(unpacked);
                continue;
            }

            plain_sources.push(src);
        }

        if plain_sources.is_empty() {
            return Ok(());
        }

        // The remaining ordinary files follow COPY semantics exactly.
        let mut copy = CopyCommand::new(
            plain_sources,
            dest,
            None,
            self.chown.clone(),
            self.text.clone(),
        );
        copy.execute(config, args, env)?;
        self.snapshot_files.extend(copy.snapshot_files());
        Ok(())
    }

    pub fn files_used_from_context(
        &self,
        config: &Config,
        args: &BuildArgs,
        env: &ExecEnv<'_>,
    ) -> Result<Vec<PathBuf>> {
        let envs = args.replacement_envs(&config.env);
        let (resolved_sources, _) =
            resolve_copy_sources(&self.sources, &self.dest, &envs, &env.context_root)?;
        Ok(resolved_sources
            .iter()
            .filter(|src| !resolve::is_src_remote_file_url(src))
            .map(|src| env.context_root.join(src))
            .collect())
    }
}
