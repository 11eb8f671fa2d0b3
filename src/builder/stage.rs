//! Drives one stage: unpack the base, execute instructions, snapshot the
//! deltas, append layers.
//!
//! The per-stage state machine is Init → BaseFetched → FSExtracted →
//! Looping → Finalized; `build` walks the last three, the coordinator
//! performs the first two when it constructs the builder.

use std::path::PathBuf;

use tracing::{info, warn};

use super::BuildStage;
use crate::cache::{CompositeKey, LayerCache};
use crate::commands::{Command, ExecEnv};
use crate::constants::AUTHOR;
use crate::dockerfile::BuildArgs;
use crate::error::Result;
use crate::fsutil::{FileHasher, Filesystem};
use crate::image::{History, Image, Layer};
use crate::options::BuildOptions;
use crate::snapshot::{is_empty_tar, Snapshotter};

/// Builder for a single stage.
pub struct StageBuilder<'a> {
    opts: &'a BuildOptions,
    stage: &'a BuildStage,
    image: Image,
    fs: Filesystem,
    snapshotter: Snapshotter,
    layer_cache: Option<&'a dyn LayerCache>,
    base_digest: String,
}

impl<'a> StageBuilder<'a> {
    /// Wraps an already-fetched base image. `commands` must already have
    /// ONBUILD triggers resolved in.
    pub fn new(
        opts: &'a BuildOptions,
        stage: &'a BuildStage,
        base_image: Image,
        layer_cache: Option<&'a dyn LayerCache>,
    ) -> Result<Self> {
        let base_digest = base_image.digest()?;
        let fs = Filesystem::new(opts.root_dir.clone(), &[opts.work_dir.clone()]);
        let hasher = FileHasher::from_mode(opts.snapshot_mode);
        let snapshotter = Snapshotter::new(fs.clone(), hasher, opts.reproducible);
        Ok(Self {
            opts,
            stage,
            image: base_image,
            fs,
            snapshotter,
            layer_cache,
            base_digest,
        })
    }

    /// Executes every instruction, snapshotting per the stage policy, and
    /// returns the image with this stage's layers and config applied.
    pub fn build(mut self) -> Result<Image> {
        // FSExtracted: materialize the base and record the baseline.
        self.fs.extract_image(&self.image)?;
        self.snapshotter.init()?;

        let mut args = BuildArgs::new(&self.opts.build_args);
        args.add_meta_args(&self.stage.meta_args);

        let mut key = CompositeKey::new(FileHasher::from_mode(self.opts.snapshot_mode));
        key.add_key(&self.base_digest);
        for binding in &self.opts.build_args {
            key.add_key(binding);
        }

        let env = ExecEnv {
            fs: &self.fs,
            context_root: self.opts.src_context.clone(),
            work_dir: self.opts.work_dir.clone(),
        };

        let mut config = self.image.config_file().config.clone();
        let mut cache_chain_intact = true;
        let mut saw_cmd = false;
        let mut saw_entrypoint = false;

        let last_index = self.stage.commands.len().saturating_sub(1);
        for (index, instruction) in self.stage.commands.iter().enumerate() {
            self.opts.check_cancelled()?;

            let Some(mut command) = Command::from_instruction(instruction)? else {
                continue;
            };
            info!("{}", command.text());
            saw_cmd |= matches!(instruction, crate::dockerfile::Instruction::Cmd { .. });
            saw_entrypoint |= matches!(
                instruction,
                crate::dockerfile::Instruction::Entrypoint { .. }
            );

            // Advance the fingerprint before anything executes, so a key
            // always describes the state the command starts from.
            key.add_key(&command.text());
            for file in command.files_used_from_context(&config, &args, &env)? {
                key.add_path(&file)?;
            }
            let current_key = key.hash();

            // Cache probe. A miss breaks the chain: once one layer must be
            // rebuilt, everything after it is rebuilt too.
            if let Some(cache) = self.layer_cache.filter(|_| cache_chain_intact) {
                if command.is_cacheable() {
                    match cache.retrieve_layer(&current_key) {
                        Some(cached_layer) => {
                            if let Some(substitute) = command.cache_command(cached_layer) {
                                command = substitute;
                            }
                        }
                        None => {
                            info!(key = %current_key, "cache miss, rebuilding from here");
                            cache_chain_intact = false;
                        }
                    }
                }
            }

            command.execute(&mut config, &mut args, &env)?;

            let files = command.files_to_snapshot();
            if !self.should_take_snapshot(index == last_index, &files) {
                continue;
            }

            // Stages that snapshot only once aren't tracking what earlier
            // commands changed, so their one snapshot must diff everything.
            let full_required =
                !self.stage.final_stage || self.opts.single_snapshot || files.is_none();
            let tar = if full_required {
                self.snapshotter.take_snapshot_full()?
            } else {
                let mut files = files.clone().unwrap_or_default();
                // VOLUME creates the directory in one instruction; its
                // contents appear to whichever snapshot runs next.
                for volume in config.volume_paths() {
                    files.push(self.fs.resolve(&volume));
                }
                self.snapshotter.take_snapshot(&files)?
            };

            let history = History {
                author: Some(AUTHOR.to_string()),
                created_by: Some(command.text()),
                ..Default::default()
            };
            if is_empty_tar(&tar) {
                // Any non-metadata instruction that changed nothing still
                // gets an empty-layer history entry; metadata instructions
                // (which report an empty snapshot list) get none.
                let metadata_only = matches!(&files, Some(files) if files.is_empty());
                if !metadata_only {
                    info!("no files changed, appending empty layer to config");
                    self.image.append_empty_layer(history);
                }
                continue;
            }

            let layer = Layer::from_tar(&tar)?;
            if let Some(cache) = self.layer_cache {
                if let Err(e) = cache.push_layer(&current_key, &layer, &command.text()) {
                    warn!(key = %current_key, error = %e, "failed to push layer to cache");
                }
            }
            self.image.append_layer(layer, history);
        }

        // Docker's historical behavior: declaring an ENTRYPOINT without a
        // CMD in the same stage clears any inherited CMD.
        if saw_entrypoint && !saw_cmd {
            config.cmd = None;
        }

        self.image.set_config(config);
        Ok(self.image)
    }

    /// Snapshot policy: intermediate stages and single-snapshot mode only
    /// snapshot after the last instruction; otherwise every instruction is
    /// snapshotted unless it reported "metadata only".
    fn should_take_snapshot(&self, is_last: bool, files: &Option<Vec<PathBuf>>) -> bool {
        if !self.stage.final_stage || self.opts.single_snapshot {
            return is_last;
        }
        !matches!(files, Some(files) if files.is_empty())
    }
}
