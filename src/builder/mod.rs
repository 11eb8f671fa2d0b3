//! Multi-stage build coordination.
//!
//! [`do_build`] parses the Dockerfile, orders the stages, works out which
//! intermediate stages later stages depend on, then runs each stage through
//! a [`StageBuilder`]. Non-final stages that are depended on are persisted
//! twice: as a tarball (to become a later stage's base image) and as an
//! extracted tree (for `COPY --from` reads by source path). The filesystem
//! is wiped between stages so no stage sees its predecessor's residue.

mod stage;

pub use stage::StageBuilder;

use std::collections::HashMap;
use std::fs;

use chrono::Utc;
use tracing::{debug, info};

use crate::cache::{LayerCache, LocalLayerCache, RegistryLayerCache};
use crate::constants::NO_BASE_IMAGE;
use crate::dockerfile::{self, BuildArgs, Instruction, MetaArg, RawStage};
use crate::error::{Error, Result};
use crate::fsutil::Filesystem;
use crate::image::{tarball, Image};
use crate::options::BuildOptions;
use crate::registry::{RegistryClient, RegistryOptions};
use crate::resolve;

/// A stage plus everything the coordinator worked out about it.
#[derive(Debug, Clone)]
pub struct BuildStage {
    pub index: usize,
    pub name: Option<String>,
    pub base_name: String,
    pub commands: Vec<Instruction>,
    pub meta_args: Vec<MetaArg>,
    /// The single stage whose output is the build result.
    pub final_stage: bool,
    /// Some later stage consumes this one (FROM or COPY --from).
    pub save_stage: bool,
    /// Set when the base is a prior stage rather than a registry image.
    pub base_image_index: Option<usize>,
}

/// Builds the Dockerfile at `opts.dockerfile_path` and returns the final
/// stage's image. Pushing and tarball output are the driver's business.
pub fn do_build(opts: &BuildOptions) -> Result<Image> {
    let stages = compute_stages(opts)?;
    let layer_cache = make_layer_cache(opts)?;
    let layer_cache_ref: Option<&dyn LayerCache> = layer_cache.as_deref();
    let fs = Filesystem::new(opts.root_dir.clone(), &[opts.work_dir.clone()]);

    for build_stage in &stages {
        opts.check_cancelled()?;
        info!(
            stage = build_stage.index,
            base = %build_stage.base_name,
            "building stage"
        );

        let (base_image, commands_with_triggers) = fetch_base_image(opts, build_stage)?;
        let staged = BuildStage {
            commands: commands_with_triggers,
            ..build_stage.clone()
        };

        let builder = StageBuilder::new(opts, &staged, base_image, layer_cache_ref)?;
        let mut image = builder.build()?;

        if staged.final_stage {
            image.set_created(Utc::now());
            if opts.reproducible {
                image.canonicalize()?;
            }
            if opts.cleanup {
                fs.delete()?;
            }
            info!(digest = %image.digest()?, "build complete");
            return Ok(image);
        }

        if staged.save_stage {
            persist_stage(opts, &staged, &image)?;
        }
        // No residue may leak into the next stage's base.
        fs.delete()?;
    }

    Err(Error::Config(
        "Dockerfile produced no final stage".to_string(),
    ))
}

/// Parses the Dockerfile and derives the stage plan: name resolution,
/// target pruning, save-stage analysis.
pub fn compute_stages(opts: &BuildOptions) -> Result<Vec<BuildStage>> {
    let content = read_dockerfile(opts)?;
    let (mut raw_stages, meta_args) = dockerfile::parse(&content)?;
    dockerfile::resolve_stages(&mut raw_stages);

    if let Some(target) = &opts.target {
        let wanted = target.to_ascii_lowercase();
        let position = raw_stages
            .iter()
            .position(|s| s.name.as_deref() == Some(wanted.as_str()))
            .ok_or_else(|| Error::Config(format!("target stage '{target}' does not exist")))?;
        raw_stages.truncate(position + 1);
    }

    validate_copy_from(&raw_stages)?;
    let dependencies = stage_dependencies(&raw_stages, &meta_args, &opts.build_args)?;

    let last = raw_stages.len() - 1;
    let mut stages: Vec<BuildStage> = raw_stages
        .into_iter()
        .map(|raw| BuildStage {
            final_stage: raw.index == last,
            save_stage: false,
            base_image_index: None,
            meta_args: meta_args.clone(),
            index: raw.index,
            name: raw.name,
            base_name: raw.base_name,
            commands: raw.commands,
        })
        .collect();

    for i in 0..stages.len() {
        let base = stages[i].base_name.clone();
        stages[i].base_image_index = stages[..i].iter().position(|s| {
            s.name
                .as_deref()
                .is_some_and(|n| n.eq_ignore_ascii_case(&base))
                || s.index.to_string() == base
        });
    }
    for i in 0..stages.len() {
        let referenced_as_base = stages[i + 1..]
            .iter()
            .any(|s| s.base_image_index == Some(i));
        let copied_from = dependencies.contains_key(&i);
        stages[i].save_stage = referenced_as_base || copied_from;
    }
    debug!(stages = stages.len(), "computed stage plan");
    Ok(stages)
}

/// For each stage, the context-resolved source paths later stages will
/// `COPY --from` it. Presence in this map is what makes a stage worth
/// saving.
pub fn stage_dependencies(
    stages: &[RawStage],
    meta_args: &[MetaArg],
    build_args: &[String],
) -> Result<HashMap<usize, Vec<String>>> {
    let mut dependencies: HashMap<usize, Vec<String>> = HashMap::new();
    for stage in stages {
        let mut args = BuildArgs::new(build_args);
        args.add_meta_args(meta_args);
        let mut envs: Vec<String> = args.replacement_envs(&[]);

        for command in &stage.commands {
            match command {
                Instruction::Env(pairs) => {
                    for (key, value) in pairs {
                        let value = resolve::resolve_environment_replacement(value, &envs, false)?;
                        envs.push(format!("{key}={value}"));
                    }
                }
                Instruction::Arg { key, default } => {
                    args.add_arg(key, default.as_deref());
                    envs = args.replacement_envs(&envs);
                }
                Instruction::Copy {
                    sources,
                    from: Some(from),
                    ..
                } => {
                    let Ok(index) = from.parse::<usize>() else {
                        continue;
                    };
                    let resolved =
                        resolve::resolve_environment_replacement_list(sources, &envs, true)?;
                    dependencies.entry(index).or_default().extend(resolved);
                }
                _ => {}
            }
        }
    }
    Ok(dependencies)
}

/// Every `COPY --from` must point at an earlier stage.
fn validate_copy_from(stages: &[RawStage]) -> Result<()> {
    for stage in stages {
        for command in &stage.commands {
            if let Instruction::Copy {
                from: Some(from), ..
            } = command
            {
                let index: usize = from.parse().map_err(|_| {
                    Error::Config(format!(
                        "COPY --from={from} does not name a previous stage"
                    ))
                })?;
                if index >= stage.index {
                    return Err(Error::Config(format!(
                        "COPY --from={index} in stage {} is out of range",
                        stage.index
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Loads the stage's base image and resolves its ONBUILD triggers into the
/// instruction list.
fn fetch_base_image(
    opts: &BuildOptions,
    stage: &BuildStage,
) -> Result<(Image, Vec<Instruction>)> {
    let mut image = retrieve_source_image(opts, stage)?;

    let mut commands = stage.commands.clone();
    if let Some(triggers) = image.config_file().config.on_build.clone() {
        if !triggers.is_empty() {
            info!(count = triggers.len(), "executing build triggers");
            let mut parsed = Vec::with_capacity(triggers.len());
            for raw in &triggers {
                let instruction = dockerfile::parse_command(raw)?;
                if matches!(instruction, Instruction::Onbuild(_)) {
                    return Err(Error::Config(format!(
                        "ONBUILD trigger may not itself be ONBUILD: {raw}"
                    )));
                }
                parsed.push(instruction);
            }
            parsed.extend(commands);
            commands = parsed;
        }
        // The triggers fired; the consuming image must not inherit them.
        image.config_file_mut().config.on_build = None;
    }
    Ok((image, commands))
}

/// Resolves the stage's base reference and loads it: scratch, a prior
/// stage's saved tarball, the local cache, or the registry.
fn retrieve_source_image(opts: &BuildOptions, stage: &BuildStage) -> Result<Image> {
    let mut args = BuildArgs::new(&opts.build_args);
    args.add_meta_args(&stage.meta_args);
    let envs = args.replacement_envs(&[]);
    let base_name = resolve::resolve_environment_replacement(&stage.base_name, &envs, false)?;

    if base_name == NO_BASE_IMAGE {
        info!("no base image, nothing to extract");
        return Ok(Image::empty());
    }

    if let Some(index) = stage.base_image_index {
        let tar_path = opts.stages_dir().join(index.to_string());
        info!(stage = index, path = %tar_path.display(), "using saved stage as base");
        return tarball::read_image(&tar_path);
    }

    // Content-addressed references can short-circuit through the local
    // cache; tag references have to hit the registry to learn their digest.
    let local_cache = match (&opts.cache, &opts.cache_dir) {
        (true, Some(dir)) => Some(LocalLayerCache::new(dir)?),
        _ => None,
    };
    if let Some(cache) = &local_cache {
        if let Some(digest) = base_name.split_once("@sha256:").map(|(_, d)| d) {
            if let Some(image) = cache.retrieve_image(digest) {
                return Ok(image);
            }
        }
    }

    let client = RegistryClient::new(RegistryOptions {
        insecure: opts.insecure_pull,
        skip_tls_verify: opts.skip_tls_verify_pull,
        credentials: None,
    })?;
    info!(reference = %base_name, "downloading base image");
    let image = client.pull_image(&base_name)?;

    if let Some(cache) = &local_cache {
        let digest = image.digest()?;
        if let Err(e) = cache.store_image(&digest, &image) {
            tracing::warn!(error = %e, "failed to cache base image locally");
        }
    }
    Ok(image)
}

/// Persists a depended-on stage: image tarball for FROM, extracted tree
/// for COPY --from.
fn persist_stage(opts: &BuildOptions, stage: &BuildStage, image: &Image) -> Result<()> {
    let stages_dir = opts.stages_dir();
    fs::create_dir_all(&stages_dir).map_err(|e| Error::fs(&stages_dir, e))?;
    let tar_path = stages_dir.join(stage.index.to_string());
    info!(stage = stage.index, path = %tar_path.display(), "saving stage image");
    tarball::write_image(&tar_path, image)?;

    let fs_dir = opts.stage_fs_dir(stage.index);
    fs::create_dir_all(&fs_dir).map_err(|e| Error::fs(&fs_dir, e))?;
    Filesystem::new(fs_dir, &[]).extract_image(image)
}

/// Builds the configured layer cache, if any.
fn make_layer_cache(opts: &BuildOptions) -> Result<Option<Box<dyn LayerCache>>> {
    if !opts.cache {
        return Ok(None);
    }
    if let Some(repo) = &opts.cache_repo {
        let client = RegistryClient::new(RegistryOptions {
            insecure: opts.insecure_pull,
            skip_tls_verify: opts.skip_tls_verify_pull,
            credentials: None,
        })?;
        return Ok(Some(Box::new(RegistryLayerCache::new(client, repo.clone()))));
    }
    if let Some(dir) = &opts.cache_dir {
        return Ok(Some(Box::new(LocalLayerCache::new(dir)?)));
    }
    Err(Error::Config(
        "caching enabled but neither cache_repo nor cache_dir is set".to_string(),
    ))
}

/// Reads the Dockerfile, falling back to a path relative to the context.
fn read_dockerfile(opts: &BuildOptions) -> Result<String> {
    let direct = &opts.dockerfile_path;
    if direct.exists() {
        return fs::read_to_string(direct).map_err(|e| Error::fs(direct, e));
    }
    let in_context = opts.src_context.join(direct);
    if in_context.exists() {
        return fs::read_to_string(&in_context).map_err(|e| Error::fs(&in_context, e));
    }
    Err(Error::Config(format!(
        "no Dockerfile at {} or within the build context",
        direct.display()
    )))
}
