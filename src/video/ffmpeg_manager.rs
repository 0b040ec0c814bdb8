use std::io::Read;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::SourceOpenError;

/// Spawns streaming decoder processes and keeps count of the live ones.
///
/// One manager is owned per backend; the count is shared with every
/// [`DecoderProcess`] it hands out so it drops back when a process is reaped.
#[derive(Clone)]
pub struct FFmpegManager {
    active_count: Arc<AtomicUsize>,
    max_processes: usize,
    kill_timeout: Duration,
}

impl FFmpegManager {
    pub const DEFAULT_MAX_PROCESSES: usize = 4;

    pub fn new(kill_timeout: Duration) -> Self {
        Self {
            active_count: Arc::new(AtomicUsize::new(0)),
            max_processes: Self::DEFAULT_MAX_PROCESSES,
            kill_timeout,
        }
    }

    /// Spawn `command` with stdout piped, refusing if the limit is reached.
    pub fn spawn_stream(&self, mut command: Command) -> Result<DecoderProcess, SourceOpenError> {
        let current_count = self.active_count.load(Ordering::SeqCst);
        if current_count >= self.max_processes {
            return Err(SourceOpenError::ProcessLimit {
                active: current_count,
                max: self.max_processes,
            });
        }

        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let tool = command.get_program().to_string_lossy().into_owned();
        let mut child = command
            .spawn()
            .map_err(|source| SourceOpenError::Spawn { tool, source })?;
        let stdout = child.stdout.take();

        self.active_count.fetch_add(1, Ordering::SeqCst);
        log::debug!(
            "Spawned decoder process {}, active count: {}",
            child.id(),
            self.active_count.load(Ordering::SeqCst)
        );

        Ok(DecoderProcess {
            child: Some(child),
            stdout,
            active_count: self.active_count.clone(),
            kill_timeout: self.kill_timeout,
        })
    }

    pub fn active_count(&self) -> usize {
        self.active_count.load(Ordering::SeqCst)
    }
}

/// A running decoder whose stdout carries raw frames or PCM.
pub struct DecoderProcess {
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    active_count: Arc<AtomicUsize>,
    kill_timeout: Duration,
}

impl DecoderProcess {
    pub fn stdout(&mut self) -> Option<&mut ChildStdout> {
        self.stdout.as_mut()
    }

    /// Kill and reap the process, giving up after the kill timeout.
    ///
    /// Idempotent. A process that refuses to exit in time is left to the OS.
    pub fn terminate(&mut self) {
        // Closing the pipe first unblocks a decoder stuck writing to it
        self.stdout = None;

        let Some(mut child) = self.child.take() else {
            return;
        };
        let pid = child.id();

        if let Err(e) = child.kill() {
            log::debug!("Decoder process {} kill: {}", pid, e);
        }

        let start = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    log::debug!("Decoder process {} exited ({})", pid, status);
                    break;
                }
                Ok(None) if start.elapsed() < self.kill_timeout => {
                    std::thread::sleep(Duration::from_millis(10));
                }
                Ok(None) => {
                    log::warn!(
                        "Decoder process {} did not exit within {:?}, abandoning it",
                        pid,
                        self.kill_timeout
                    );
                    break;
                }
                Err(e) => {
                    log::warn!("Failed to reap decoder process {}: {}", pid, e);
                    break;
                }
            }
        }

        self.active_count.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Drop for DecoderProcess {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Fill `buf` from `reader`, stopping early only at end of stream.
///
/// Returns the number of bytes read; anything short of `buf.len()` means EOF.
pub fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
