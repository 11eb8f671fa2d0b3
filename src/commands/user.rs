//! USER: validate and record the user the image runs as.
//!
//! Lookups read `/etc/passwd` and `/etc/group` from the build root, not the
//! host, because the user must exist inside the image being built.

use std::path::Path;

use tracing::info;

use super::ExecEnv;
use crate::dockerfile::BuildArgs;
use crate::error::{Error, Result};
use crate::image::Config;

#[derive(Debug, Clone)]
pub struct UserCommand {
    user: String,
    text: String,
}

impl UserCommand {
    pub fn new(user: String, text: String) -> Self {
        Self { user, text }
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
        info!("cmd: USER");
        let envs = args.replacement_envs(&config.env);

        let (user_part, group_part) = match self.user.split_once(':') {
            Some((u, g)) => (u, Some(g)),
            None => (self.user.as_str(), None),
        };
        let user = crate::resolve::resolve_environment_replacement(user_part, &envs, false)?;
        let group = group_part
            .map(|g| crate::resolve::resolve_environment_replacement(g, &envs, false))
            .transpose()?;

        // Validate both halves resolve inside the image.
        lookup_user(env.fs.root(), &user)?;
        if let Some(group) = &group {
            lookup_group(env.fs.root(), group)?;
        }

        config.user = match group {
            Some(group) => format!("{user}:{group}"),
            None => user,
        };
        Ok(())
    }
}

/// Resolves `user[:group]` to a uid/gid pair against the build root.
pub fn resolve_user_spec(spec: &str, root: &Path) -> Result<(u32, u32)> {
    let (user, group) = match spec.split_once(':') {
        Some((u, g)) => (u, Some(g)),
        None => (spec, None),
    };
    let (uid, primary_gid) = lookup_user(root, user)?;
    let gid = match group {
        Some(group) => lookup_group(root, group)?,
        None => primary_gid,
    };
    Ok((uid, gid))
}

/// Finds `user` in the root's `/etc/passwd`; numeric ids pass through.
/// Returns `(uid, primary_gid)`.
pub fn lookup_user(root: &Path, user: &str) -> Result<(u32, u32)> {
    if let Ok(uid) = user.parse::<u32>() {
        return Ok((uid, uid));
    }
    let passwd = root.join("etc/passwd");
    let content = std::fs::read_to_string(&passwd).map_err(|e| Error::UserLookup {
        user: user.to_string(),
        reason: format!("cannot read {}: {e}", passwd.display()),
    })?;
    for line in content.lines() {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.first() == Some(&user) && fields.len() >= 4 {
            let uid = fields[2].parse().map_err(|_| Error::UserLookup {
                user: user.to_string(),
                reason: format!("malformed uid '{}'", fields[2]),
            })?;
            let gid = fields[3].parse().map_err(|_| Error::UserLookup {
                user: user.to_string(),
                reason: format!("malformed gid '{}'", fields[3]),
            })?;
            return Ok((uid, gid));
        }
    }
    Err(Error::UserLookup {
        user: user.to_string(),
        reason: "no such user in /etc/passwd".to_string(),
    })
}

/// Finds `group` in the root's `/etc/group`; numeric ids pass through.
pub fn lookup_group(root: &Path, group: &str) -> Result<u32> {
    if let Ok(gid) = group.parse::<u32>() {
        return Ok(gid);
    }
    let groups = root.join("etc/group");
    let content = std::fs::read_to_string(&groups).map_err(|e| Error::UserLookup {
        user: group.to_string(),
        reason: format!("cannot read {}: {e}", groups.display()),
    })?;
    for line in content.lines() {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.first() == Some(&group) && fields.len() >= 3 {
            return fields[2].parse().map_err(|_| Error::UserLookup {
                user: group.to_string(),
                reason: format!("malformed gid '{}'", fields[2]),
            });
        }
    }
    Err(Error::UserLookup {
        user: group.to_string(),
        reason: "no such group in /etc/group".to_string(),
    })
}
