// Remux: repackage the assembled transport stream with an external ffmpeg
// process, stream copy only.

use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::DownloadError;
use crate::config::RemuxConfig;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Longest stderr excerpt carried in a remux error.
const STDERR_TAIL_BYTES: usize = 2048;

pub struct Remuxer {
    ffmpeg_path: String,
    timeout: Duration,
}

impl Remuxer {
    pub fn new(config: &RemuxConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            timeout: config.timeout,
        }
    }

    fn build_args(input: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-y", "-hide_banner", "-loglevel", "error", "-i"]
            .into_iter()
            .map(OsString::from)
            .collect();
        args.push(input.as_os_str().to_owned());
        args.extend(
            ["-c", "copy", "-bsf:a", "aac_adtstoasc"]
                .into_iter()
                .map(OsString::from),
        );
        args.push(output.as_os_str().to_owned());
        args
    }

    #[cfg(windows)]
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.creation_flags(CREATE_NO_WINDOW);
        cmd
    }

    #[cfg(not(windows))]
    fn command(&self) -> Command {
        Command::new(&self.ffmpeg_path)
    }

    /// Run ffmpeg on `input`, writing `output`. The process is killed when the
    /// deadline passes.
    pub async fn remux(&self, input: &Path, output: &Path) -> Result<(), DownloadError> {
        let mut cmd = self.command();
        cmd.args(Self::build_args(input, output))
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(ffmpeg = %self.ffmpeg_path, input = %input.display(), output = %output.display(), "Starting remux");
        let child = cmd.spawn().map_err(|e| DownloadError::Remux {
            reason: format!("failed to spawn {}: {e}", self.ffmpeg_path),
        })?;

        let result = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| DownloadError::Remux {
                reason: format!("failed to wait for {}: {e}", self.ffmpeg_path),
            })?,
            Err(_) => {
                return Err(DownloadError::Remux {
                    reason: format!("ffmpeg did not finish within {:?}", self.timeout),
                });
            }
        };

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let trimmed = stderr.trim();
            let tail_start = trimmed
                .char_indices()
                .map(|(i, _)| i)
                .find(|&i| trimmed.len() - i <= STDERR_TAIL_BYTES)
                .unwrap_or(trimmed.len());
            return Err(DownloadError::Remux {
                reason: format!(
                    "ffmpeg exited with {}: {}",
                    result.status,
                    &trimmed[tail_start..]
                ),
            });
        }

        Ok(())
    }
}
