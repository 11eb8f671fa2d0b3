//! RUN: spawn the command against the build root.

use std::process::{Command as Process, Stdio};

use tracing::info;

use super::ExecEnv;
use crate::constants::DEFAULT_SHELL;
use crate::dockerfile::BuildArgs;
use crate::error::{Error, Result};
use crate::image::Config;

#[derive(Debug, Clone)]
pub struct RunCommand {
    cmdline: Vec<String>,
    prepend_shell: bool,
    text: String,
}

impl RunCommand {
    pub fn new(cmdline: Vec<String>, prepend_shell: bool, text: String) -> Self {
        Self {
            cmdline,
            prepend_shell,
            text,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn execute(
        &mut self,
        config: &mut Config,
        args: &mut BuildArgs,
        env: &ExecEnv<'_>,
    ) -> Result<()> {
        let command_line = shell_form(&self.cmdline, self.prepend_shell, config);
        let (program, program_args) = command_line
            .split_first()
            .ok_or_else(|| Error::Config("RUN with empty command line".to_string()))?;

        info!(cmd = %program, args = ?program_args, "running command");

        let mut process = Process::new(program);
        process
            .args(program_args)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            // The child's environment is exactly the replacement envs; the
            // host process environment must not leak into the build.
            .env_clear()
            .envs(
                args.replacement_envs(&config.env)
                    .iter()
                    .filter_map(|b| b.split_once('=').map(|(k, v)| (k.to_string(), v.to_string()))),
            );

        let cwd = if config.working_dir.is_empty() {
            env.fs.root().to_path_buf()
        } else {
            env.fs.resolve(&config.working_dir)
        };
        process.current_dir(cwd);

        if !config.user.is_empty() {
            let envs = args.replacement_envs(&config.env);
            let user =
                crate::resolve::resolve_environment_replacement(&config.user, &envs, false)?;
            let (uid, gid) = super::resolve_user_spec(&user, env.fs.root())?;
            use std::os::unix::process::CommandExt;
            process.uid(uid).gid(gid);
        }

        let status = process.status().map_err(|e| Error::Spawn {
            command: program.clone(),
            reason: e.to_string(),
        })?;
        if !status.success() {
            return Err(Error::Exec {
                command: command_line.join(" "),
                status: status.code().unwrap_or(-1),
            });
        }
        Ok(())
    }
}

/// Builds the argv: shell form joins the command line behind the config's
/// shell (or `/bin/sh -c`), exec form runs verbatim.
pub fn shell_form(cmdline: &[String], prepend_shell: bool, config: &Config) -> Vec<String> {
    if !prepend_shell {
        return cmdline.to_vec();
    }
    let mut argv: Vec<String> = match &config.shell {
        Some(shell) if !shell.is_empty() => shell.clone(),
        _ => DEFAULT_SHELL.iter().map(|s| s.to_string()).collect(),
    };
    argv.push(cmdline.join(" "));
    argv
}
