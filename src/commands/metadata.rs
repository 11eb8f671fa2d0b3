//! Metadata instructions: config updates with no (or trivial) filesystem
//! footprint. VOLUME is the one member that also touches disk, creating
//! the declared directories.

use std::path::PathBuf;

use tracing::info;

use super::run::shell_form;
use super::ExecEnv;
use crate::dockerfile::{BuildArgs, Instruction};
use crate::error::{Error, Result};
use crate::image::Config;
use crate::resolve;

#[derive(Debug, Clone)]
pub struct MetadataCommand {
    instruction: Instruction,
    text: String,
    snapshot_files: Vec<PathBuf>,
}

impl MetadataCommand {
    pub fn new(instruction: Instruction, text: String) -> Self {
        Self {
            instruction,
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
        info!("cmd: {}", self.text);
        let envs = args.replacement_envs(&config.env);

        match &self.instruction {
            Instruction::Env(pairs) => {
                for (key, value) in pairs {
                    let value = resolve::resolve_environment_replacement(value, &envs, false)?;
                    config.set_env(key, &value);
                }
            }
            Instruction::Arg { key, default } => {
                let key = resolve::resolve_environment_replacement(key, &envs, false)?;
                let default = default
                    .as_deref()
                    .map(|d| resolve::resolve_environment_replacement(d, &envs, false))
                    .transpose()?;
                args.add_arg(&key, default.as_deref());
            }
            Instruction::Expose(ports) => {
                for port in ports {
                    let port = resolve::resolve_environment_replacement(port, &envs, false)?;
                    config.expose_port(&normalize_port(&port)?);
                }
            }
            Instruction::Volume(paths) => {
                for path in paths {
                    let path = resolve::resolve_environment_replacement(path, &envs, true)?;
                    config.add_volume(&path);
                    // The directory exists from this instruction on; its
                    // future contents are captured by the next snapshot.
                    let disk_path = env.fs.resolve(&path);
                    std::fs::create_dir_all(&disk_path).map_err(|e| Error::fs(&disk_path, e))?;
                    self.snapshot_files.push(disk_path);
                }
            }
            Instruction::Label(pairs) => {
                let labels = config.labels.get_or_insert_with(Default::default);
                for (key, value) in pairs {
                    let value = resolve::resolve_environment_replacement(value, &envs, false)?;
                    labels.insert(key.clone(), value);
                }
            }
            Instruction::Cmd {
                cmdline,
                prepend_shell,
            } => {
                let cmd = shell_form(cmdline, *prepend_shell, config);
                config.cmd = Some(cmd);
                config.args_escaped = true;
            }
            Instruction::Entrypoint {
                cmdline,
                prepend_shell,
            } => {
                let entrypoint = shell_form(cmdline, *prepend_shell, config);
                config.entrypoint = Some(entrypoint);
            }
            Instruction::Shell(words) => {
                config.shell = Some(words.clone());
            }
            Instruction::Healthcheck(hc) => {
                config.healthcheck = Some(hc.clone());
            }
            Instruction::StopSignal(signal) => {
                let signal = resolve::resolve_environment_replacement(signal, &envs, false)?;
                config.stop_signal = Some(signal);
            }
            Instruction::Onbuild(expression) => {
                config
                    .on_build
                    .get_or_insert_with(Vec::new)
                    .push(expression.clone());
            }
            other => {
                return Err(Error::Config(format!(
                    "{} is not a metadata instruction",
                    other.text()
                )))
            }
        }
        Ok(())
    }
}

/// `port[/proto]`, defaulting the protocol to tcp.
fn normalize_port(port: &str) -> Result<String> {
    let (number, proto) = match port.split_once('/') {
        Some((number, proto)) => (number, proto),
        None => (port, "tcp"),
    };
    number.parse::<u16>().map_err(|_| {
        Error::Config(format!("invalid port number in EXPOSE: {port}"))
    })?;
    match proto {
        "tcp" | "udp" | "sctp" => Ok(format!("{number}/{proto}")),
        other => Err(Error::Config(format!(
            "invalid protocol '{other}' in EXPOSE: {port}"
        ))),
    }
}
