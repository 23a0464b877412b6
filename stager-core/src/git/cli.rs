//! Git executable driver

use std::ffi::OsString;
use std::path::Path;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::MirrorGit;
use crate::credentials::redact;
use crate::deadline::Deadline;
use crate::mirror::TrackedBranch;
use crate::{Error, Result};

/// Captured result of one git invocation
#[derive(Debug)]
struct GitOutput {
    status: ExitStatus,
    stdout: String,
    stderr: String,
}

/// Runs the git executable, killing any invocation still alive at the
/// deadline
#[derive(Debug, Clone)]
pub struct GitCli {
    program: String,
    deadline: Deadline,
}

impl GitCli {
    pub fn new(program: impl Into<String>, deadline: Deadline) -> Self {
        Self {
            program: program.into(),
            deadline,
        }
    }

    /// Run git and return its output whatever the exit status
    async fn exec<I, S>(&self, cwd: Option<&Path>, args: I) -> Result<GitOutput>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
        let shown = describe(&args);

        if self.deadline.is_expired() {
            return Err(self.deadline.error());
        }

        debug!(command = %shown, cwd = ?cwd, "Running git");

        let mut cmd = Command::new(&self.program);
        cmd.args(&args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so remote helpers die with git
        #[cfg(unix)]
        cmd.process_group(0);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::Config(format!("git executable not found at '{}'", self.program))
            } else {
                Error::Io(e)
            }
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let finished = {
            let collect = async { tokio::join!(drain(stdout), drain(stderr), child.wait()) };
            tokio::select! {
                done = collect => Some(done),
                _ = tokio::time::sleep_until(self.deadline.instant()) => None,
            }
        };

        let Some((stdout, stderr, status)) = finished else {
            warn!(command = %shown, pid = ?child.id(), "git still running at deadline, killing it");
            kill_group(&child);
            // kill() also waits, so the child is reaped before we return
            if let Err(e) = child.kill().await {
                warn!(command = %shown, error = %e, "Failed to kill git");
            }
            return Err(self.deadline.error());
        };

        Ok(GitOutput {
            status: status?,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: redact(String::from_utf8_lossy(&stderr).trim()),
        })
    }

    /// Run git and fail with [`Error::Git`] on a non-zero exit
    async fn run<I, S>(&self, cwd: Option<&Path>, args: I) -> Result<GitOutput>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
        let shown = describe(&args);
        let output = self.exec(cwd, args).await?;

        if !output.status.success() {
            return Err(Error::Git {
                command: shown,
                code: output.status.code(),
                stderr: output.stderr,
            });
        }

        Ok(output)
    }
}

#[async_trait]
impl MirrorGit for GitCli {
    async fn clone_mirror(&self, branch: &TrackedBranch) -> Result<()> {
        if let Some(parent) = branch.mirror_dir.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!(branch = %branch.name, dir = %branch.mirror_dir.display(), "Cloning mirror");

        self.run(
            None,
            [
                OsString::from("clone"),
                "--branch".into(),
                branch.name.clone().into(),
                "--".into(),
                branch.source_clone_url.clone().into(),
                branch.mirror_dir.clone().into(),
            ],
        )
        .await?;

        self.run(
            Some(&branch.mirror_dir),
            ["remote", "add", "upstream", branch.upstream_clone_url.as_str()],
        )
        .await?;

        // The safety check right after a clone needs upstream refs
        self.run(Some(&branch.mirror_dir), ["fetch", "--prune", "upstream"])
            .await?;

        Ok(())
    }

    async fn fetch(&self, dir: &Path) -> Result<()> {
        for remote in ["origin", "upstream"] {
            self.run(Some(dir), ["fetch", "--prune", remote]).await?;
        }
        Ok(())
    }

    async fn rebase(&self, dir: &Path, dest_branch: &str) -> Result<bool> {
        let target = format!("upstream/{}", dest_branch);
        let output = self.exec(Some(dir), ["merge", "--ff-only", target.as_str()]).await?;

        if output.status.success() {
            return Ok(true);
        }

        warn!(
            dir = %dir.display(),
            target = %target,
            stderr = %output.stderr,
            "Fast-forward refused"
        );
        Ok(false)
    }

    async fn reset_hard(&self, dir: &Path, branch: &str) -> Result<()> {
        let target = format!("origin/{}", branch);
        self.run(Some(dir), ["reset", "--hard", target.as_str()]).await?;
        Ok(())
    }

    async fn local_sha(&self, dir: &Path) -> Result<String> {
        let output = self.run(Some(dir), ["rev-parse", "HEAD"]).await?;
        Ok(output.stdout.trim().to_string())
    }

    async fn is_ancestor_of(&self, dir: &Path, reference: &str) -> Result<bool> {
        let args = ["merge-base", "--is-ancestor", reference, "HEAD"];
        let output = self.exec(Some(dir), args).await?;

        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            code => Err(Error::Git {
                command: args.join(" "),
                code,
                stderr: output.stderr,
            }),
        }
    }
}

/// SIGKILL the child's whole process group
#[cfg(unix)]
fn kill_group(child: &tokio::process::Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return;
    };
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        debug!(pgid = raw, error = %e, "Process group already gone");
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &tokio::process::Child) {}

/// Read a pipe to the end, keeping whatever arrived before an error
async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf).await;
    }
    buf
}

fn describe(args: &[OsString]) -> String {
    let joined = args
        .iter()
        .map(|a| a.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ");
    redact(&joined)
}
