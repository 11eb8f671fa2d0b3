//! Build-arg bookkeeping.
//!
//! An ARG is visible to substitution only once the Dockerfile declared it;
//! the user's `KEY=VALUE` override wins over the Dockerfile default.

use std::collections::HashMap;

/// Declared ARGs for one stage, plus the user overrides that may fill them.
#[derive(Debug, Clone, Default)]
pub struct BuildArgs {
    /// `--build-arg KEY=VALUE` overrides from the driver.
    overrides: HashMap<String, String>,
    /// Declared args in declaration order: `(key, effective value)`.
    declared: Vec<(String, Option<String>)>,
}

impl BuildArgs {
    /// Parses `KEY=VALUE` override strings. Entries without `=` declare a
    /// key with no value and are ignored at substitution time.
    pub fn new(overrides: &[String]) -> Self {
        let overrides = overrides
            .iter()
            .filter_map(|binding| {
                binding
                    .split_once('=')
                    .map(|(k, v)| (k.to_string(), v.to_string()))
            })
            .collect();
        Self {
            overrides,
            declared: Vec::new(),
        }
    }

    /// Declares an arg, making it visible to later substitutions. The
    /// user's override takes precedence over `default`; redeclaration
    /// updates in place.
    pub fn add_arg(&mut self, key: &str, default: Option<&str>) {
        let value = self
            .overrides
            .get(key)
            .cloned()
            .or_else(|| default.map(str::to_string));
        if let Some(entry) = self.declared.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value;
            return;
        }
        self.declared.push((key.to_string(), value));
    }

    /// Declares every meta-arg (ARG before the first FROM) at once.
    pub fn add_meta_args(&mut self, meta_args: &[super::MetaArg]) {
        for arg in meta_args {
            self.add_arg(&arg.key, arg.default.as_deref());
        }
    }

    /// The environment substitution sees: the config's env followed by every
    /// declared arg that has a value. An ENV binding shadows a same-named
    /// ARG, so args already present in the config env are dropped.
    pub fn replacement_envs(&self, config_env: &[String]) -> Vec<String> {
        let env_keys: std::collections::HashSet<&str> = config_env
            .iter()
            .filter_map(|binding| binding.split('=').next())
            .collect();
        let mut envs: Vec<String> = config_env.to_vec();
        for (key, value) in &self.declared {
            if env_keys.contains(key.as_str()) {
                continue;
            }
            if let Some(value) = value {
                envs.push(format!("{key}={value}"));
            }
        }
        envs
    }
}
