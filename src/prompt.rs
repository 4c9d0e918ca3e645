//! Console interaction used before any download starts.

use std::io;

use dialoguer::Input;

use crate::plugins::OptionSpec;

/// Source of interactive answers for option negotiation and handler selection.
pub trait Prompter: Send + Sync {
    /// Ask for the value of an option. An empty string means "no answer".
    fn ask(&self, handler: &str, spec: &OptionSpec) -> io::Result<String>;

    /// Ask which of `names` should handle `url`. Returns the 1-based choice.
    fn choose(&self, url: &str, names: &[&str]) -> io::Result<usize>;
}

/// Prompts on the terminal through `dialoguer`.
pub struct ConsolePrompter;

impl Prompter for ConsolePrompter {
    fn ask(&self, handler: &str, spec: &OptionSpec) -> io::Result<String> {
        let mut prompt = format!("[{handler}] {} ({})", spec.description, spec.key);
        if let Some(default) = spec.default {
            prompt.push_str(&format!(" [default: {default}]"));
        }

        let answer: String = Input::new()
            .with_prompt(prompt)
            .allow_empty(true)
            .interact_text()
            .map_err(|e| io::Error::other(e.to_string()))?;

        if answer.trim().is_empty() {
            return Ok(spec.default.unwrap_or_default().to_string());
        }
        Ok(answer)
    }

    fn choose(&self, url: &str, names: &[&str]) -> io::Result<usize> {
        eprintln!("Multiple handlers can download {url}:");
        for (i, name) in names.iter().enumerate() {
            eprintln!("  {}) {}", i + 1, name);
        }

        Input::<usize>::new()
            .with_prompt("Pick a handler")
            .interact_text()
            .map_err(|e| io::Error::other(e.to_string()))
    }
}
