//! WORKDIR: set (and create) the working directory.

use std::path::PathBuf;

use tracing::info;

use super::ExecEnv;
use crate::dockerfile::BuildArgs;
use crate::error::{Error, Result};
use crate::image::Config;
use crate::resolve;

#[derive(Debug, Clone)]
pub struct WorkdirCommand {
    path: String,
    text: String,
    snapshot_files: Vec<PathBuf>,
}

impl WorkdirCommand {
    pub fn new(path: String, text: String) -> Self {
        Self {
            path,
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
        let envs = args.replacement_envs(&config.env);
        let resolved = resolve::resolve_environment_replacement(&self.path, &envs, true)?;

        config.working_dir = if resolved.starts_with('/') {
            resolve::clean_path(&resolved)
        } else {
            resolve::clean_path(&format!("{}/{}", config.working_dir, resolved))
        };
        info!(dir = %config.working_dir, "changed working directory");

        let disk_path = env.fs.resolve(&config.working_dir);
        std::fs::create_dir_all(&disk_path).map_err(|e| Error::fs(&disk_path, e))?;
        self.snapshot_files = vec![disk_path];
        Ok(())
    }
}
