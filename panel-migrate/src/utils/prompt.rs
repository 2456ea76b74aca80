//! Operator decisions.
//!
//! Every choice the pipeline must not make on its own (transfer-tool
//! fallback, database replacement, extension installs) goes through a
//! [`Prompter`].

use dialoguer::{Confirm, Select};

use crate::utils::errors::{MigrateError, Result};

pub trait Prompter {
    /// Pick one of `options`, returning its index.
    fn choose(&self, prompt: &str, options: &[String]) -> Result<usize>;

    fn confirm(&self, prompt: &str, default: bool) -> Result<bool>;
}

/// Interactive prompts on the controlling terminal.
#[derive(Debug, Default)]
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn choose(&self, prompt: &str, options: &[String]) -> Result<usize> {
        Select::new()
            .with_prompt(prompt)
            .items(options)
            .default(options.len().saturating_sub(1))
            .interact()
            .map_err(no_terminal)
    }

    fn confirm(&self, prompt: &str, default: bool) -> Result<bool> {
        Confirm::new()
            .with_prompt(prompt)
            .default(default)
            .interact()
            .map_err(no_terminal)
    }
}

fn no_terminal(e: dialoguer::Error) -> MigrateError {
    MigrateError::Precondition(format!("operator decision required but no terminal is available: {}", e))
}

/// Answers given up front on the command line; anything else goes to `fallback`,
/// the terminal by default.
#[derive(Debug, Default)]
pub struct PresetPrompter<F = TerminalPrompter> {
    /// Option label chosen whenever it is offered
    pub choice: Option<String>,

    /// Answer to every confirmation
    pub assume_yes: bool,

    fallback: F,
}

impl PresetPrompter {
    pub fn new(choice: Option<String>, assume_yes: bool) -> Self {
        Self::with_fallback(choice, assume_yes, TerminalPrompter)
    }
}

impl<F: Prompter> PresetPrompter<F> {
    pub fn with_fallback(choice: Option<String>, assume_yes: bool, fallback: F) -> Self {
        Self {
            choice,
            assume_yes,
            fallback,
        }
    }
}

impl<F: Prompter> Prompter for PresetPrompter<F> {
    fn choose(&self, prompt: &str, options: &[String]) -> Result<usize> {
        if let Some(choice) = &self.choice {
            if let Some(idx) = options.iter().position(|o| o == choice) {
                tracing::info!("{}: {} (preset)", prompt, choice);
                return Ok(idx);
            }
            tracing::debug!("Preset {:?} not offered for {:?}", choice, prompt);
        }
        self.fallback.choose(prompt, options)
    }

    fn confirm(&self, prompt: &str, default: bool) -> Result<bool> {
        if self.assume_yes {
            tracing::info!("{}: yes (preset)", prompt);
            return Ok(true);
        }
        self.fallback.confirm(prompt, default)
    }
}

impl<P: Prompter + ?Sized> Prompter for &P {
    fn choose(&self, prompt: &str, options: &[String]) -> Result<usize> {
        (**self).choose(prompt, options)
    }

    fn confirm(&self, prompt: &str, default: bool) -> Result<bool> {
        (**self).confirm(prompt, default)
    }
}


#[cfg(test)]
mod tests {
    use super::fake::ScriptedPrompter;
    use super::*;

    #[test]
    fn test_preset_choice_is_used_when_offered() {
        let prompter = PresetPrompter::new(Some("plain-copy".into()), false);
        let options = vec!["install-remote".to_string(), "plain-copy".to_string(), "abort".to_string()];
        assert_eq!(prompter.choose("Transfer tool missing", &options).unwrap(), 1);
    }

    #[test]
    fn test_preset_not_offered_falls_through() {
        let fallback = ScriptedPrompter::new().choosing("abort");
        let prompter = PresetPrompter::with_fallback(Some("install-remote".into()), false, &fallback);
        let options = vec!["install-local".to_string(), "plain-copy".to_string(), "abort".to_string()];

        assert_eq!(prompter.choose("Transfer tool missing", &options).unwrap(), 2);
        assert_eq!(fallback.questions()[0].1, options);
    }

    #[test]
    fn test_preset_yes_confirms() {
        let prompter = PresetPrompter::new(None, true);
        assert!(prompter.confirm("Install extensions?", false).unwrap());
    }

    #[test]
    fn test_scripted_prompter_rejects_unoffered_choice() {
        let prompter = ScriptedPrompter::new().choosing("replace");
        let err = prompter.choose("pick", &["abort".to_string()]).unwrap_err();
        assert!(matches!(err, MigrateError::Precondition(_)));
        assert_eq!(prompter.questions().len(), 1);
    }
}
