//! External command execution.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, warn};

/// Captured result of one shell command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Last `lines` lines of stderr followed by stdout, for diagnostics.
    pub fn tail(&self, lines: usize) -> String {
        let mut out = tail_lines(&self.stderr, lines);
        let stdout = tail_lines(&self.stdout, lines);
        if !out.is_empty() && !stdout.is_empty() {
            out.push('\n');
        }
        out.push_str(&stdout);
        out
    }
}

/// Run `command` through `sh -c` in `cwd` with `env` layered on top of the
/// inherited environment.
///
/// The command runs in its own process group. If the returned future is
/// dropped, which is how stage timeouts and cancellation stop it, the whole
/// group is killed, including tools the shell started.
pub async fn run_shell(
    command: &str,
    cwd: &Path,
    env: &BTreeMap<String, String>,
) -> std::io::Result<CommandOutput> {
    debug!(command = %command, cwd = %cwd.display(), "spawning command");
    let start = Instant::now();

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(cwd)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let child = cmd.spawn()?;
    let group = GroupGuard::new(child.id());
    let output = child.wait_with_output().await?;
    group.disarm();

    let result = CommandOutput {
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        duration_ms: start.elapsed().as_millis() as u64,
    };
    debug!(
        command = %command,
        exit_code = ?result.exit_code,
        duration_ms = result.duration_ms,
        "command finished"
    );
    Ok(result)
}

/// Kills the child's process group when dropped before `disarm`.
struct GroupGuard {
    pgid: Option<u32>,
}

impl GroupGuard {
    fn new(pgid: Option<u32>) -> Self {
        Self { pgid }
    }

    fn disarm(mut self) {
        self.pgid = None;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        let Some(pgid) = self.pgid else {
            return;
        };
        #[cfg(unix)]
        {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            match killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
                Ok(()) => debug!(pgid, "killed interrupted command group"),
                Err(nix::errno::Errno::ESRCH) => {}
                Err(e) => warn!(pgid, error = %e, "failed to kill command group"),
            }
        }
    }
}

fn tail_lines(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.trim_end().lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}
