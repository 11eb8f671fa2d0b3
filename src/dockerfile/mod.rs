//! Dockerfile front end: stage splitting and the typed instruction AST.
//!
//! `parse` turns raw bytes into an ordered stage list plus the meta-args
//! declared before the first FROM. `resolve_stages` rewrites stage-name
//! references (`COPY --from=builder`) to indices so the rest of the engine
//! only ever sees numbers.

mod build_args;
mod instructions;

pub use build_args::BuildArgs;
pub use instructions::{split_words, Instruction};

use crate::error::{Error, Result};

/// One `FROM`-delimited section of a Dockerfile, as parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct RawStage {
    pub index: usize,
    /// `AS <name>` alias, lowercased, if present.
    pub name: Option<String>,
    /// Base reference as written (env substitution happens later).
    pub base_name: String,
    pub commands: Vec<Instruction>,
}

/// `ARG` declared before the first `FROM`; visible to base-name resolution
/// in every stage.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaArg {
    pub key: String,
    pub default: Option<String>,
}

/// Parses a whole Dockerfile into stages and meta-args.
pub fn parse(content: &str) -> Result<(Vec<RawStage>, Vec<MetaArg>)> {
    let mut stages: Vec<RawStage> = Vec::new();
    let mut meta_args = Vec::new();

    for line in logical_lines(content) {
        let instruction = Instruction::parse(&line)?;
        match instruction {
            Instruction::From { image, alias } => {
                stages.push(RawStage {
                    index: stages.len(),
                    name: alias.map(|a| a.to_ascii_lowercase()),
                    base_name: image,
                    commands: Vec::new(),
                });
            }
            Instruction::Arg { key, default } if stages.is_empty() => {
                meta_args.push(MetaArg { key, default });
            }
            other => match stages.last_mut() {
                Some(stage) => stage.commands.push(other),
                None => {
                    return Err(Error::Parse {
                        reason: format!(
                            "instruction before the first FROM: {}",
                            other.text()
                        ),
                    })
                }
            },
        }
    }

    if stages.is_empty() {
        return Err(Error::Parse {
            reason: "Dockerfile contains no FROM instruction".to_string(),
        });
    }
    Ok((stages, meta_args))
}

/// Re-parses a single raw instruction line; used for ONBUILD triggers.
pub fn parse_command(raw: &str) -> Result<Instruction> {
    Instruction::parse(raw)
}

/// Rewrites `COPY --from=<name>` to `COPY --from=<index>`. Idempotent:
/// numeric references pass through untouched.
pub fn resolve_stages(stages: &mut [RawStage]) {
    let names: Vec<(String, usize)> = stages
        .iter()
        .filter_map(|s| s.name.clone().map(|n| (n, s.index)))
        .collect();

    for stage in stages.iter_mut() {
        for command in stage.commands.iter_mut() {
            if let Instruction::Copy {
                from: Some(from), ..
            } = command
            {
                if let Some((_, index)) = names
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(from))
                {
                    *from = index.to_string();
                }
            }
        }
    }
}

/// Looks up the stage index a base name refers to, if it names or indexes a
/// prior stage.
pub fn base_image_index(stages: &[RawStage], current: usize, base_name: &str) -> Option<usize> {
    stages[..current].iter().position(|stage| {
        stage
            .name
            .as_deref()
            .is_some_and(|n| n.eq_ignore_ascii_case(base_name))
            || stage.index.to_string() == base_name
    })
}

/// Joins continuation lines, strips comments and blanks.
fn logical_lines(content: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for raw in content.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(stripped) = line.strip_suffix('\\') {
            current.push_str(stripped);
            current.push(' ');
            continue;
        }
        current.push_str(line);
        lines.push(std::mem::take(&mut current));
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}
