//! # External Transcoder
//!
//! Formats like WebM/Opus and M4A/AAC are handed to a system `ffmpeg` binary,
//! which turns them into a plain 16-bit PCM WAV that the primary decoder can
//! read.
//!
//! ## Process Handling:
//! - The upload is written to a temporary file (ffmpeg needs to seek in MP4
//!   containers, so stdin is not an option)
//! - WAV output is collected from stdout on a reader thread
//! - The child is killed if it runs past the configured timeout, or if
//!   waiting on it fails

use crate::audio::format::AudioFormat;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// How often the child process is polled while waiting for it to exit.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Upper bound on the `ffmpeg -version` startup check.
const VERSION_TIMEOUT: Duration = Duration::from_secs(5);

/// How deep to walk the WinGet packages tree looking for ffmpeg.
const WINGET_SEARCH_DEPTH: usize = 6;

/// Errors from running the external transcoder.
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("failed to prepare transcoder input: {0}")]
    Io(#[from] std::io::Error),

    #[error("transcoder timed out after {0:?}")]
    Timeout(Duration),

    #[error("transcoder exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("transcoder produced no output")]
    EmptyOutput,
}

/// Converts bytes in some claimed container format into an uncompressed WAV.
pub trait Transcoder: Send + Sync {
    fn transcode(&self, bytes: &[u8], source_format: &AudioFormat) -> Result<Vec<u8>, TranscodeError>;
}

/// `ffmpeg` executable invoked as a child process.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    executable: PathBuf,
    timeout: Duration,
}

impl FfmpegTranscoder {
    pub fn new(executable: PathBuf, timeout: Duration) -> Self {
        Self { executable, timeout }
    }

    /// Find an ffmpeg executable.
    ///
    /// ## Search Order:
    /// 1. `configured`, if it points at an existing file
    /// 2. Every directory on `PATH`
    /// 3. The WinGet packages tree (Windows only)
    /// 4. Well-known install locations for the platform
    ///
    /// Returns `None` when nothing is found; the caller decides whether that
    /// is fatal (it isn't for us, the streaming decoder takes over).
    pub fn locate(configured: Option<&Path>, timeout: Duration) -> Option<Self> {
        if let Some(path) = configured {
            if path.is_file() {
                info!("Using configured ffmpeg at {}", path.display());
                return Some(Self::new(path.to_path_buf(), timeout));
            }
            warn!("Configured ffmpeg path {} does not exist, searching PATH", path.display());
        }

        let on_path = std::env::var_os("PATH")
            .and_then(|path_var| find_in_dirs(std::env::split_paths(&path_var), executable_name()));
        if let Some(found) = on_path {
            info!("Found ffmpeg in PATH at {}", found.display());
            return Some(Self::new(found, timeout));
        }

        if let Some(packages) = winget_packages_dir() {
            if let Some(found) = find_nested(&packages, executable_name(), WINGET_SEARCH_DEPTH) {
                info!("Found ffmpeg in WinGet packages at {}", found.display());
                return Some(Self::new(found, timeout));
            }
            debug!("No ffmpeg under {}", packages.display());
        }

        let found = common_locations().into_iter().find(|candidate| is_executable(candidate))?;
        info!("Found ffmpeg at {}", found.display());
        Some(Self::new(found, timeout))
    }

    /// First line of `ffmpeg -version`, or `None` if the binary doesn't answer.
    pub fn version(&self) -> Option<String> {
        let mut command = Command::new(&self.executable);
        command
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        match run_to_completion(command, VERSION_TIMEOUT) {
            Ok(run) if run.status.success() => String::from_utf8_lossy(&run.stdout)
                .lines()
                .next()
                .map(|line| line.trim().to_string())
                .filter(|line| !line.is_empty()),
            Ok(run) => {
                debug!(status = %run.status, "ffmpeg -version failed");
                None
            }
            Err(e) => {
                debug!("ffmpeg -version could not run: {}", e);
                None
            }
        }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    fn build_command(&self, input: &Path, source_format: &AudioFormat) -> Command {
        let mut command = Command::new(&self.executable);
        command.args(["-hide_banner", "-loglevel", "error", "-nostdin", "-y"]);
        if let Some(demuxer) = source_format.ffmpeg_demuxer() {
            command.args(["-f", demuxer]);
        }
        command
            .arg("-i")
            .arg(input)
            .args(["-vn", "-acodec", "pcm_s16le", "-f", "wav", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }
}

impl Transcoder for FfmpegTranscoder {
    fn transcode(&self, bytes: &[u8], source_format: &AudioFormat) -> Result<Vec<u8>, TranscodeError> {
        let mut input = tempfile::Builder::new()
            .prefix("voice-upload-")
            .suffix(&format!(".{}", source_format))
            .tempfile()?;
        input.write_all(bytes)?;
        input.flush()?;

        debug!(
            executable = %self.executable.display(),
            format = %source_format,
            input_bytes = bytes.len(),
            "Invoking transcoder"
        );

        let run = run_to_completion(self.build_command(input.path(), source_format), self.timeout)?;

        if !run.status.success() {
            return Err(TranscodeError::Failed {
                status: run.status.to_string(),
                stderr: String::from_utf8_lossy(&run.stderr).trim().to_string(),
            });
        }
        let output = run.stdout;
        if output.is_empty() {
            return Err(TranscodeError::EmptyOutput);
        }

        debug!(output_bytes = output.len(), "Transcoder finished");
        Ok(output)
    }
}

fn spawn_reader<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

/// A finished child process and everything it wrote.
struct CompletedRun {
    status: ExitStatus,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

/// Spawn `command`, drain both pipes, and wait up to `timeout`.
///
/// The reader threads are joined on every path, including timeouts and wait
/// failures.
fn run_to_completion(mut command: Command, timeout: Duration) -> Result<CompletedRun, TranscodeError> {
    let mut child = command.spawn()?;
    let stdout = spawn_reader(child.stdout.take());
    let stderr = spawn_reader(child.stderr.take());

    let status = wait_with_timeout(&mut child, timeout);
    let stdout = stdout.join().unwrap_or_default();
    let stderr = stderr.join().unwrap_or_default();

    Ok(CompletedRun {
        status: status?,
        stdout,
        stderr,
    })
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<ExitStatus, TranscodeError> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) if Instant::now() >= deadline => {
                reap(child);
                return Err(TranscodeError::Timeout(timeout));
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                reap(child);
                return Err(e.into());
            }
        }
    }
}

/// Kill and wait. Killing closes the pipes, which lets the reader threads finish.
fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn executable_name() -> &'static str {
    if cfg!(windows) {
        "ffmpeg.exe"
    } else {
        "ffmpeg"
    }
}

fn find_in_dirs<I>(dirs: I, name: &str) -> Option<PathBuf>
where
    I: IntoIterator<Item = PathBuf>,
{
    dirs.into_iter()
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

/// Walk `root` up to `max_depth` levels for `name`.
///
/// WinGet nests binaries under versioned package folders; when several
/// match, the longest path wins since it usually carries the newest version.
fn find_nested(root: &Path, name: &str, max_depth: usize) -> Option<PathBuf> {
    let mut matches = Vec::new();
    let mut pending = vec![(root.to_path_buf(), 0usize)];

    while let Some((dir, depth)) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                if depth < max_depth {
                    pending.push((path, depth + 1));
                }
            } else if entry.file_name() == name && is_executable(&path) {
                matches.push(path);
            }
        }
    }

    matches.into_iter().max_by_key(|path| path.as_os_str().len())
}

#[cfg(windows)]
fn winget_packages_dir() -> Option<PathBuf> {
    let local = std::env::var_os("LOCALAPPDATA")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("USERPROFILE").map(|home| Path::new(&home).join("AppData").join("Local")))?;
    let packages = local.join("Microsoft").join("WinGet").join("Packages");
    packages.is_dir().then_some(packages)
}

#[cfg(not(windows))]
fn winget_packages_dir() -> Option<PathBuf> {
    None
}

#[cfg(windows)]
fn common_locations() -> Vec<PathBuf> {
    [
        r"C:\ffmpeg\bin\ffmpeg.exe",
        r"C:\Program Files\ffmpeg\bin\ffmpeg.exe",
        r"C:\Program Files (x86)\ffmpeg\bin\ffmpeg.exe",
    ]
    .into_iter()
    .map(PathBuf::from)
    .collect()
}

/// Where package managers put ffmpeg when a service runs with a stripped `PATH`.
#[cfg(not(windows))]
fn common_locations() -> Vec<PathBuf> {
    ["/usr/local/bin/ffmpeg", "/opt/homebrew/bin/ffmpeg", "/usr/bin/ffmpeg", "/opt/local/bin/ffmpeg"]
        .into_iter()
        .map(PathBuf::from)
        .collect()
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
