//! Running external tools with a deadline and captured output.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tl_core::{Error, Result};
use tokio::process::Command;

/// Used when the caller never sets a deadline.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Diagnostics longer than this are cut to their last lines; ffmpeg
/// reports the interesting error at the end.
const MAX_DIAGNOSTIC_LINES: usize = 20;

/// What a finished tool printed.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// The last lines of stderr, trimmed.
    pub fn diagnostics(&self) -> String {
        tail_lines(&self.stderr, MAX_DIAGNOSTIC_LINES)
    }
}

/// One invocation of an external program.
///
/// ```no_run
/// use tl_av::ToolCommand;
///
/// # async fn example() -> tl_core::Result<()> {
/// let mut cmd = ToolCommand::new("ffmpeg");
/// cmd.arg("-version");
/// println!("{}", cmd.execute().await?.stdout);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Run to completion and capture both output streams.
    ///
    /// Spawn failures, a non-zero exit (with the tail of stderr) and an
    /// expired deadline all come back as [`Error::Tool`]. On timeout the
    /// child is killed.
    pub async fn execute(&self) -> Result<ToolOutput> {
        let name = tool_name(&self.program);

        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::tool(&name, format!("failed to spawn: {e}")))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| Error::tool(&name, format!("timed out after {:?}", self.timeout)))?
            .map_err(|e| Error::tool(&name, format!("failed waiting for exit: {e}")))?;

        let output = ToolOutput {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !output.status.success() {
            return Err(Error::tool(
                name,
                format!("exited with {}: {}", output.status, output.diagnostics()),
            ));
        }
        Ok(output)
    }
}

fn tool_name(program: &Path) -> String {
    program
        .file_name()
        .unwrap_or(program.as_os_str())
        .to_string_lossy()
        .into_owned()
}

fn tail_lines(text: &str, max: usize) -> String {
    let lines: Vec<&str> = text.trim().lines().collect();
    let start = lines.len().saturating_sub(max);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout() {
        let mut cmd = ToolCommand::new("echo");
        cmd.arg("hello");
        // minimal environments may lack echo
        if let Ok(out) = cmd.execute().await {
            assert!(out.status.success());
            assert_eq!(out.stdout.trim(), "hello");
        }
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let err = ToolCommand::new("/nonexistent/ffmpeg")
            .execute()
            .await
            .unwrap_err();
        match err {
            Error::Tool { tool, message } => {
                assert_eq!(tool, "ffmpeg");
                assert!(message.contains("failed to spawn"), "{message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_carries_stderr() {
        let err = ToolCommand::new("sh")
            .args(["-c", "echo broken chunk >&2; exit 3"])
            .execute()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("broken chunk"), "{err}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn deadline_kills_the_child() {
        let err = ToolCommand::new("sleep")
            .arg("10")
            .timeout(Duration::from_millis(100))
            .execute()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"), "{err}");
    }

    #[test]
    fn args_accumulate() {
        let mut cmd = ToolCommand::new("ffmpeg");
        cmd.arg("-y").args(["-i", "in.webm"]);
        assert_eq!(cmd.get_args(), ["-y", "-i", "in.webm"]);
    }

    #[test]
    fn diagnostics_keep_the_last_lines() {
        let stderr: String = (0..30).map(|i| format!("line {i}\n")).collect();
        let tail = tail_lines(&stderr, MAX_DIAGNOSTIC_LINES);
        assert_eq!(tail.lines().count(), MAX_DIAGNOSTIC_LINES);
        assert!(tail.starts_with("line 10"));
        assert!(tail.ends_with("line 29"));
        assert_eq!(tail_lines("  only\n", 5), "only");
    }
}
