//! Local process execution.
//!
//! Everything that shells out on the local host goes through [`CommandRunner`]
//! so the pipeline can be driven in tests without the real tools installed.

use std::io;
use std::process::Command;

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` and wait for it to exit.
    fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput>;

    /// Run a full command line through `sh -c`.
    fn run_shell(&self, line: &str) -> io::Result<CommandOutput> {
        self.run("sh", &["-c", line])
    }

    /// Run with the terminal attached so the tool's own progress output is
    /// visible; only the exit code comes back.
    fn run_attached(&self, program: &str, args: &[&str]) -> io::Result<i32> {
        Ok(self.run(program, args)?.exit_code)
    }

    /// Whether `tool` resolves on this host's `PATH`.
    fn has_tool(&self, tool: &str) -> bool;
}

/// Runs real processes on the local host.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput> {
        tracing::debug!("exec: {} {}", program, args.join(" "));
        let output = Command::new(program).args(args).output()?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            // Killed by a signal: no code
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    fn run_attached(&self, program: &str, args: &[&str]) -> io::Result<i32> {
        tracing::debug!("exec (attached): {} {}", program, args.join(" "));
        let status = Command::new(program).args(args).status()?;
        Ok(status.code().unwrap_or(-1))
    }

    fn has_tool(&self, tool: &str) -> bool {
        which::which(tool).is_ok()
    }
}

/// Single-quote `value` for `sh`.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// `value` unchanged when it is a plain shell word, quoted otherwise.
pub fn shell_word(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | ':' | '@' | '+' | ',' | '='));
    if plain {
        value.to_string()
    } else {
        shell_quote(value)
    }
}

/// Substitute `{key}` placeholders in a command template. Values are inserted
/// as single shell words.
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{}}}", key), &shell_word(value))
    })
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_template() {
        let line = render_template(
            "install_soft.sh 0 install {engine} {version}",
            &[("engine", "mysql"), ("version", "5.7")],
        );
        assert_eq!(line, "install_soft.sh 0 install mysql 5.7");
    }

    #[test]
    fn test_render_template_keeps_values_single_words() {
        let line = render_template(
            "install_soft.sh 0 install {extension} {version}",
            &[("extension", "zend opcache"), ("version", "7.4; rm -rf /")],
        );
        assert_eq!(line, "install_soft.sh 0 install 'zend opcache' '7.4; rm -rf /'");
        assert_eq!(shell_word("it's"), r"'it'\''s'");
        assert_eq!(shell_word(""), "''");
    }

    #[test]
    fn test_render_template_leaves_unknown_placeholders() {
        assert_eq!(render_template("{a} {b}", &[("a", "1")]), "1 {b}");
    }

    #[test]
    fn test_system_runner_captures_exit_code() {
        let out = SystemRunner.run_shell("echo hello; exit 3").unwrap();
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.exit_code, 3);
        assert!(!out.success());
    }

    #[test]
    fn test_system_runner_attached_returns_exit_code() {
        assert_eq!(SystemRunner.run_attached("sh", &["-c", "exit 4"]).unwrap(), 4);
    }
}
