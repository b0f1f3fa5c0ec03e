//! Subprocess execution for command-line tools.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::debug;

/// Lines of tool output kept in a failure message
const OUTPUT_TAIL_LINES: usize = 20;

/// A tool invocation
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: String,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run the tool from `dir` instead of the current directory
    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Run to completion and return stdout.
    ///
    /// The child is killed if the returned future is dropped, so a stage
    /// timeout never leaves the tool running.
    pub async fn run(&self) -> Result<String> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.cwd {
            command.current_dir(dir);
        }

        debug!(program = %self.program, args = ?self.args, "Running tool");

        let output = match command.output().await {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                anyhow::bail!("Command not found: {}", self.program)
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to run {}", self.program));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = if stderr.trim().is_empty() {
                tail(&stdout, OUTPUT_TAIL_LINES)
            } else {
                tail(&stderr, OUTPUT_TAIL_LINES)
            };
            let exit_code = output.status.code().unwrap_or(-1);
            anyhow::bail!(
                "{} failed with exit code {}: {}",
                self.program,
                exit_code,
                detail
            );
        }

        Ok(stdout)
    }
}

/// Last `n` non-blank lines of `text`
fn tail(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}
