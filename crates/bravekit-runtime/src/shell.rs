//! External command execution.
//!
//! Everything that talks to `multipass` or `lxc` goes through [`Shell`] so
//! command sequences can be replayed against a recording fake.

use std::path::PathBuf;
use std::process::Command;

use bravekit_common::error::{BraveError, Result};

/// Runs external programs.
pub trait Shell: Send + Sync {
    /// Runs `program` with `args` and returns its stdout.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::Command`] if the program cannot be spawned or
    /// exits unsuccessfully.
    fn run(&self, program: &str, args: &[String]) -> Result<String>;

    /// Locates `program` on the search path.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::NotFound`] if the program is not installed.
    fn locate(&self, program: &str) -> Result<PathBuf> {
        which::which(program).map_err(|_| BraveError::NotFound {
            kind: "program",
            id: program.to_string(),
        })
    }
}

/// [`Shell`] backed by `std::process::Command`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemShell;

impl Shell for SystemShell {
    fn run(&self, program: &str, args: &[String]) -> Result<String> {
        let rendered = render(program, args);
        tracing::debug!(command = %rendered, "running command");

        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| BraveError::Command {
                command: rendered.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("exited with {}", output.status)
            } else {
                stderr
            };
            return Err(BraveError::Command {
                command: rendered,
                message,
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Renders a command line for logs and errors.
#[must_use]
pub fn render(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Builds an owned argument vector from string slices.
#[must_use]
pub fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| (*s).to_string()).collect()
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::{Shell, render};
    use bravekit_common::error::{BraveError, Result};

    /// Pairs of (substring of the rendered command, canned stdout or stderr).
    pub(crate) type Script = Vec<(&'static str, std::result::Result<&'static str, &'static str>)>;

    /// Records every command and answers from a script; unmatched commands
    /// succeed with empty output.
    #[derive(Default)]
    pub(crate) struct ScriptedShell {
        calls: Mutex<Vec<String>>,
        responses: Script,
    }

    impl ScriptedShell {
        pub(crate) fn new(responses: Script) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                responses,
            }
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Shell for ScriptedShell {
        fn run(&self, program: &str, argv: &[String]) -> Result<String> {
            let line = render(program, argv);
            self.calls.lock().unwrap().push(line.clone());
            for (needle, response) in &self.responses {
                if line.contains(needle) {
                    return (*response)
                        .map(str::to_string)
                        .map_err(|m| BraveError::Command {
                            command: line.clone(),
                            message: m.to_string(),
                        });
                }
            }
            Ok(String::new())
        }

        fn locate(&self, program: &str) -> Result<std::path::PathBuf> {
            Ok(std::path::PathBuf::from("/usr/bin").join(program))
        }
    }
}
