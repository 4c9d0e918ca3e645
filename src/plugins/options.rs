use std::collections::HashMap;

use tracing::{debug, warn};

use super::types::{OptionSpec, Options};
use crate::error::PluginError;
use crate::prompt::Prompter;

/// Operator-supplied option values.
///
/// Values given on the command line apply to every handler declaring the key
/// and take precedence over per-handler presets from the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    cli: HashMap<String, String>,
    presets: HashMap<String, HashMap<String, String>>,
}

impl Overrides {
    pub fn new(cli: HashMap<String, String>) -> Self {
        Self {
            cli,
            presets: HashMap::new(),
        }
    }

    pub fn with_presets(mut self, presets: HashMap<String, HashMap<String, String>>) -> Self {
        self.presets = presets;
        self
    }

    pub fn get(&self, handler: &str, key: &str) -> Option<&str> {
        self.cli
            .get(key)
            .or_else(|| self.presets.get(handler).and_then(|p| p.get(key)))
            .map(String::as_str)
    }

    pub fn cli_keys(&self) -> impl Iterator<Item = &str> {
        self.cli.keys().map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Policy {
    /// Use declared defaults instead of prompting.
    pub use_defaults: bool,
    /// Never prompt. Implies `use_defaults`.
    pub no_prompt: bool,
}

impl Policy {
    fn defaults_active(&self) -> bool {
        self.use_defaults || self.no_prompt
    }
}

/// Resolve `specs` into a configuration bundle.
///
/// Precedence per key: override, then default (if the policy allows), then
/// prompt (required options only), otherwise the key stays unset.
pub fn negotiate(
    handler: &str,
    specs: &[OptionSpec],
    overrides: &Overrides,
    policy: Policy,
    prompter: &dyn Prompter,
) -> Result<Options, PluginError> {
    let mut options = Options::new();

    for spec in specs {
        if let Some(value) = overrides.get(handler, spec.key) {
            debug!(handler, key = spec.key, "Using override");
            options.insert(spec.key, value);
            continue;
        }

        if policy.defaults_active() {
            if let Some(default) = spec.default {
                debug!(handler, key = spec.key, default, "Using default");
                options.insert(spec.key, default);
                continue;
            }
        }

        if !spec.required {
            continue;
        }

        if policy.no_prompt {
            return Err(PluginError::MissingOption {
                handler: handler.to_string(),
                key: spec.key.to_string(),
            });
        }

        let value = loop {
            let answer = prompter.ask(handler, spec)?;
            if !answer.trim().is_empty() {
                break answer;
            }
            warn!("Option '{}' is required", spec.key);
        };
        options.insert(spec.key, value);
    }

    Ok(options)
}
