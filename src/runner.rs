use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::error::Result;

/// Result of one test command invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestOutcome {
    pub passed: bool,
    pub exit_code: i32,
    /// stdout followed by stderr
    pub output: String,
}

/// Runs the project's test command through the shell
#[derive(Debug, Clone)]
pub struct TestRunner {
    command: String,
}

impl TestRunner {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    /// Run the test command in `dir`. Build errors and failing assertions both
    /// come back as a failed outcome; only a spawn failure is an error.
    pub async fn run(&self, dir: &Path) -> Result<TestOutcome> {
        debug!(command = %self.command, dir = %dir.display(), "running tests");

        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(dir)
            .stdin(Stdio::null())
            .output()
            .await?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(TestOutcome {
            passed: output.status.success(),
            exit_code: output.status.code().unwrap_or(-1),
            output: text,
        })
    }
}
