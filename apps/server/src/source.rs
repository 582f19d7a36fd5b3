//! PCM source abstraction: pipe/file/process producers paced to real time.
//!
//! Grounded on `original_source/server/pipeReader.cpp`'s `worker()` loop: a
//! tick counter advances by `pcm_read_ms` each period; the backend performs a
//! blocking full-period read; if that read lands after the next tick has
//! already passed, a resync event carries the overrun back to the hub
//! instead of letting the source free-run behind real time.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use bytes::Bytes;
use snap_core::error::{SnapError, SnapResult};
use snap_core::sample_format::SampleFormat;
use snap_core::wire::time::WallClock;
use snap_core::PcmChunk;
use tokio::sync::{mpsc, watch};

/// Where a source's bytes come from.
#[derive(Debug, Clone)]
pub enum SourceUri {
    /// A named pipe (FIFO); created with `mkfifo` if absent.
    Pipe(PathBuf),
    /// A regular file, looped from the start on EOF.
    File(PathBuf),
    /// A subprocess whose stdout is read as raw PCM.
    Process(String),
}

impl SourceUri {
    /// Parses a `pipe:///path`, `file:///path`, or `process://cmd args...` URI.
    pub fn parse(uri: &str) -> SnapResult<Self> {
        if let Some(path) = uri.strip_prefix("pipe://") {
            Ok(Self::Pipe(PathBuf::from(path)))
        } else if let Some(path) = uri.strip_prefix("file://") {
            Ok(Self::File(PathBuf::from(path)))
        } else if let Some(cmd) = uri.strip_prefix("process://") {
            Ok(Self::Process(cmd.to_string()))
        } else {
            Err(SnapError::Config(format!("unrecognized source uri: {uri}")))
        }
    }
}

/// Source lifecycle state, published so the hub knows whether data is
/// flowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Idle,
    Playing,
    Disabled,
}

/// A resync event: the source's read loop fell behind by `overrun_ms`.
#[derive(Debug, Clone, Copy)]
pub struct Resync {
    pub overrun_ms: i64,
}

trait Backend: Send {
    /// Fills `buf` with exactly one period's worth of bytes, blocking until
    /// the whole period is available (or returning an error on a broken
    /// source).
    fn read_period(&mut self, buf: &mut [u8]) -> SnapResult<()>;
}

struct PipeBackend {
    file: std::fs::File,
}

impl PipeBackend {
    fn open(path: &Path) -> SnapResult<Self> {
        if !path.exists() {
            nix::unistd::mkfifo(path, nix::sys::stat::Mode::from_bits_truncate(0o660))
                .map_err(|e| SnapError::Source(format!("mkfifo {}: {e}", path.display())))?;
        }
        let file = std::fs::OpenOptions::new()
            .read(true)
            .open(path)
            .map_err(|e| SnapError::Source(format!("open {}: {e}", path.display())))?;
        Ok(Self { file })
    }
}

impl Backend for PipeBackend {
    fn read_period(&mut self, buf: &mut [u8]) -> SnapResult<()> {
        read_fully_with_polling(&mut self.file, buf)
    }
}

struct FileBackend {
    file: std::fs::File,
    path: PathBuf,
}

impl FileBackend {
    fn open(path: &Path) -> SnapResult<Self> {
        let file = std::fs::File::open(path)
            .map_err(|e| SnapError::Source(format!("open {}: {e}", path.display())))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Backend for FileBackend {
    fn read_period(&mut self, buf: &mut [u8]) -> SnapResult<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self
                .file
                .read(&mut buf[filled..])
                .map_err(|e| SnapError::Source(e.to_string()))?;
            if n == 0 {
                // Looped playback: EOF rewinds to the start rather than
                // ending the stream.
                self.file = std::fs::File::open(&self.path)
                    .map_err(|e| SnapError::Source(format!("reopen {}: {e}", self.path.display())))?;
                continue;
            }
            filled += n;
        }
        Ok(())
    }
}

struct ProcessBackend {
    child: Child,
}

impl ProcessBackend {
    fn spawn(cmdline: &str) -> SnapResult<Self> {
        let mut parts = cmdline.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| SnapError::Config("empty process source command".into()))?;
        let child = Command::new(program)
            .args(parts)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| SnapError::Source(format!("spawn {program}: {e}")))?;
        Ok(Self { child })
    }
}

impl Backend for ProcessBackend {
    fn read_period(&mut self, buf: &mut [u8]) -> SnapResult<()> {
        let stdout = self
            .child
            .stdout
            .as_mut()
            .ok_or_else(|| SnapError::Source("process has no stdout".into()))?;
        read_fully(stdout, buf)
    }
}

impl Drop for ProcessBackend {
    fn drop(&mut self) {
        let _ = self.child.kill();
    }
}

fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> SnapResult<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader
            .read(&mut buf[filled..])
            .map_err(|e| SnapError::Source(e.to_string()))?;
        if n == 0 {
            return Err(SnapError::Source("source EOF".into()));
        }
        filled += n;
    }
    Ok(())
}

/// Like [`read_fully`] but tolerant of a FIFO with no writer yet: a short or
/// would-block read is retried after a brief sleep instead of treated as
/// EOF, matching `pipeReader.cpp`'s open-nonblocking-and-poll behavior.
fn read_fully_with_polling<R: Read>(reader: &mut R, buf: &mut [u8]) -> SnapResult<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => std::thread::sleep(Duration::from_millis(5)),
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(e) => return Err(SnapError::Source(e.to_string())),
        }
    }
    Ok(())
}

fn open_backend(uri: &SourceUri) -> SnapResult<Box<dyn Backend>> {
    match uri {
        SourceUri::Pipe(path) => Ok(Box::new(PipeBackend::open(path)?)),
        SourceUri::File(path) => Ok(Box::new(FileBackend::open(path)?)),
        SourceUri::Process(cmd) => Ok(Box::new(ProcessBackend::spawn(cmd)?)),
    }
}

/// Runs the pacing loop to completion, sending decoded [`PcmChunk`]s and
/// [`Resync`] events downstream. Intended to be run via
/// `tokio::task::spawn_blocking`, since every backend here is blocking I/O.
pub fn run_source(
    uri: SourceUri,
    format: SampleFormat,
    pcm_read_ms: u64,
    chunk_tx: mpsc::Sender<PcmChunk>,
    resync_tx: mpsc::Sender<Resync>,
    state_tx: watch::Sender<SourceState>,
) -> SnapResult<()> {
    let period_frames = format.ms_to_frames(pcm_read_ms as f64);
    let period_bytes = period_frames as usize * format.frame_size() as usize;
    let period = Duration::from_millis(pcm_read_ms);

    let mut backend = match open_backend(&uri) {
        Ok(b) => b,
        Err(e) => {
            let _ = state_tx.send(SourceState::Disabled);
            return Err(e);
        }
    };
    let _ = state_tx.send(SourceState::Playing);

    let mut next_tick = Instant::now() + period;
    loop {
        let mut buf = vec![0u8; period_bytes];
        if let Err(e) = backend.read_period(&mut buf) {
            let _ = state_tx.send(SourceState::Idle);
            return Err(e);
        }
        let read_finished = Instant::now();

        if read_finished > next_tick {
            let overrun_ms = (read_finished - next_tick).as_millis() as i64;
            if resync_tx.blocking_send(Resync { overrun_ms }).is_err() {
                return Ok(());
            }
            next_tick = read_finished + period;
        } else {
            std::thread::sleep(next_tick.saturating_duration_since(read_finished));
            next_tick += period;
        }

        let timestamp = WallClock::now();
        match PcmChunk::new(format, Bytes::from(buf), timestamp) {
            Ok(chunk) => {
                if chunk_tx.blocking_send(chunk).is_err() {
                    return Ok(()); // hub side is shutting down
                }
            }
            Err(e) => log::warn!("source produced a malformed chunk: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pipe_uri() {
        assert!(matches!(SourceUri::parse("pipe:///tmp/snap.fifo").unwrap(), SourceUri::Pipe(p) if p == PathBuf::from("/tmp/snap.fifo")));
    }

    #[test]
    fn parses_file_uri() {
        assert!(matches!(SourceUri::parse("file:///tmp/audio.pcm").unwrap(), SourceUri::File(_)));
    }

    #[test]
    fn parses_process_uri() {
        assert!(matches!(SourceUri::parse("process://cat /dev/zero").unwrap(), SourceUri::Process(cmd) if cmd == "cat /dev/zero"));
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(SourceUri::parse("udp://239.0.0.1:1234").is_err());
    }

    #[test]
    fn file_backend_loops_on_eof() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut tmp, &[1u8, 2, 3, 4]).unwrap();
        let mut backend = FileBackend::open(tmp.path()).unwrap();
        let mut buf = [0u8; 6];
        backend.read_period(&mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4, 1, 2]);
    }
}
