//! Helpers for running external media tools (ffmpeg and friends).
//!
//! Tool paths are resolved from an environment variable with a fallback to the
//! bare program name, and spawned children never open a console window on
//! Windows.

use std::ffi::OsStr;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Resolve a tool path from `env_var`, falling back to `default`.
///
/// Empty or whitespace-only values count as unset.
pub fn resolve_tool(env_var: &str, default: &str) -> String {
    std::env::var(env_var)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Last `max_lines` non-empty lines of a tool's stderr, joined with `\n`.
///
/// ffmpeg prints its banner and stream info before the actual error, so the
/// tail is what is worth reporting.
pub fn stderr_tail(stderr: &[u8], max_lines: usize) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}

/// Suppress the console window of spawned children on Windows.
pub trait NoWindowExt {
    fn no_window(&mut self) -> &mut Self;
}

impl NoWindowExt for std::process::Command {
    fn no_window(&mut self) -> &mut Self {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.creation_flags(CREATE_NO_WINDOW);
        }
        self
    }
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) -> &mut Self {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
        self
    }
}

/// A `tokio::process::Command` for a media tool: no console window, a stable
/// `C` locale for parseable output, and killed if its future is dropped.
#[cfg(feature = "tokio")]
pub fn tool_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window().env("LC_ALL", "C").kill_on_drop(true);
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_tool_falls_back_when_unset() {
        assert_eq!(
            resolve_tool("PROCESS_UTILS_TEST_SURELY_UNSET_VAR", "ffmpeg"),
            "ffmpeg"
        );
    }

    #[test]
    fn test_stderr_tail_keeps_last_lines() {
        let stderr = b"ffmpeg version 7\n  built with gcc\n\nInput #0\nfoo.mp4: No such file or directory\n";
        assert_eq!(
            stderr_tail(stderr, 2),
            "Input #0\nfoo.mp4: No such file or directory"
        );
        assert_eq!(stderr_tail(b"", 3), "");
    }
}
