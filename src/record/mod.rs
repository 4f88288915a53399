//! Per-channel disk recording.
//!
//! Each input channel gets one bounded queue and one dedicated writer
//! thread:
//!
//! ```text
//! Audio Callback → Ring Buffer (per channel) → Writer Thread → channel_<n>.wav
//! ```
//!
//! The callback pushes the raw (pre-gain, pre-mute) period block whole, or
//! drops it and increments the channel's drop counter - it never blocks and
//! never writes a partial block. Writer threads drain their queue on a short
//! poll interval so they notice the stop signal within a bounded delay, and
//! append blocks to a mono WAV file in arrival order.
//!
//! A session is a timestamp-named directory created at start and is terminal
//! once stopped; a later start always creates a new session.

mod wav;

pub use wav::WavWriter;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Local;
use ringbuf::traits::{Consumer, Split};
use ringbuf::HeapRb;

use crate::error::RecordError;

/// How often writer threads wake to drain their queue. Short enough that
/// the stop signal is noticed well under 200 ms.
const WRITER_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long `stop()` waits for each writer before detaching it.
const WRITER_STOP_TIMEOUT: Duration = Duration::from_secs(3);

/// Session directories are named with the local start time.
const SESSION_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Samples drained per write call in the writer loop.
const DRAIN_CHUNK: usize = 4096;

/// Recording state shared with the audio callback: the active flag that
/// gates enqueueing and the per-channel overflow counters.
pub struct RecordingShared {
    active: AtomicBool,
    dropped: Vec<AtomicU64>,
}

impl RecordingShared {
    /// Creates shared state for the given number of input channels.
    #[must_use]
    pub fn new(channels: usize) -> Self {
        Self {
            active: AtomicBool::new(false),
            dropped: (0..channels).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// Whether a session is currently accepting blocks.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    /// Counts one dropped block for a channel. Queue overflow is a
    /// non-fatal, counted event.
    pub fn count_drop(&self, channel: usize) {
        if let Some(counter) = self.dropped.get(channel) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Per-channel counts of blocks dropped to queue overflow, cumulative
    /// across sessions.
    #[must_use]
    pub fn dropped_blocks(&self) -> Vec<u64> {
        self.dropped
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect()
    }
}

/// Joins a thread, giving up after `timeout`.
///
/// Returns `false` (and leaves the thread detached) when the deadline
/// passes; the caller logs what may have been lost and shutdown proceeds.
pub(crate) fn join_timeout(handle: thread::JoinHandle<()>, timeout: Duration, name: &str) -> bool {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            tracing::warn!(thread = name, timeout_ms = timeout.as_millis() as u64, "thread did not stop in time; detaching");
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
    let _ = handle.join();
    true
}

/// An active recording session: one timestamped directory, one queue and one
/// writer thread per input channel.
///
/// A session is terminal once [`stop`](RecordingSession::stop) returns; the
/// engine creates a fresh session (and directory) on its next start.
pub struct RecordingSession {
    dir: PathBuf,
    shared: Arc<RecordingShared>,
    stop: Arc<AtomicBool>,
    writers: Vec<thread::JoinHandle<()>>,
}

impl RecordingSession {
    /// Creates the session directory and starts one writer per channel.
    ///
    /// Returns the session plus the queue producers, in channel order, for
    /// the audio callback to enqueue into. `queue_capacity` is in samples
    /// (periods × frames per period).
    ///
    /// # Errors
    ///
    /// Returns a [`RecordError`] if the session directory cannot be created.
    /// A single channel file that cannot be opened is not fatal: that writer
    /// logs the error and exits, and the channel's blocks are dropped and
    /// counted.
    pub fn start(
        root: &Path,
        channels: usize,
        sample_rate: u32,
        queue_capacity: usize,
        shared: Arc<RecordingShared>,
    ) -> Result<(Self, Vec<ringbuf::HeapProd<f32>>), RecordError> {
        let dir = root.join(Local::now().format(SESSION_TIMESTAMP_FORMAT).to_string());
        std::fs::create_dir_all(&dir).map_err(|source| RecordError::CreateDir {
            path: dir.clone(),
            source,
        })?;

        let stop = Arc::new(AtomicBool::new(false));
        let mut producers = Vec::with_capacity(channels);
        let mut writers = Vec::with_capacity(channels);

        for channel in 0..channels {
            let (producer, consumer) = HeapRb::<f32>::new(queue_capacity).split();
            producers.push(producer);

            let path = dir.join(format!("channel_{}.wav", channel + 1));
            let stop_flag = Arc::clone(&stop);
            writers.push(thread::spawn(move || {
                if let Err(error) = run_writer(channel, &path, sample_rate, consumer, &stop_flag) {
                    tracing::error!(
                        channel = channel + 1,
                        path = %path.display(),
                        error = %error,
                        "recording writer failed; channel recording stopped"
                    );
                }
            }));
        }

        shared.set_active(true);
        tracing::info!(dir = %dir.display(), channels, sample_rate, "recording session started");

        Ok((
            Self {
                dir,
                shared,
                stop,
                writers,
            },
            producers,
        ))
    }

    /// The session directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Stops the session: no further blocks are accepted, every writer is
    /// signalled and joined with a bounded timeout, and the session becomes
    /// terminal.
    ///
    /// A writer that misses the timeout is detached and its in-flight
    /// buffer may be lost; this is logged, never silent.
    pub fn stop(mut self) {
        self.shared.set_active(false);
        self.stop.store(true, Ordering::Relaxed);

        for (channel, handle) in self.writers.drain(..).enumerate() {
            if !join_timeout(handle, WRITER_STOP_TIMEOUT, "recording writer") {
                tracing::warn!(
                    channel = channel + 1,
                    "writer did not flush in time; its last blocks may be lost"
                );
            }
        }

        tracing::info!(dir = %self.dir.display(), "recording session closed");
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        // Dropped without an explicit stop(): still signal and join the
        // writers so channel files get finalized.
        if !self.writers.is_empty() {
            self.shared.set_active(false);
            self.stop.store(true, Ordering::Relaxed);
            for handle in self.writers.drain(..) {
                join_timeout(handle, WRITER_STOP_TIMEOUT, "recording writer");
            }
        }
    }
}

/// The writer thread body: drain the queue, append to the channel file,
/// repeat until stopped, then finalize the WAV header.
fn run_writer(
    channel: usize,
    path: &Path,
    sample_rate: u32,
    mut queue: ringbuf::HeapCons<f32>,
    stop: &AtomicBool,
) -> Result<(), RecordError> {
    let mut writer = WavWriter::create(path, sample_rate)?;
    let mut scratch = vec![0.0f32; DRAIN_CHUNK];

    loop {
        // Read the flag before draining so a block enqueued just before the
        // stop signal is still flushed by this final pass.
        let stopping = stop.load(Ordering::Relaxed);

        loop {
            let drained = queue.pop_slice(&mut scratch);
            if drained == 0 {
                break;
            }
            writer.write_block(&scratch[..drained])?;
        }

        if stopping {
            break;
        }
        thread::sleep(WRITER_POLL_INTERVAL);
    }

    let samples = writer.finalize()?;
    tracing::debug!(channel = channel + 1, samples, "channel file finalized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringbuf::traits::Producer;
    use tempfile::tempdir;

    #[test]
    fn test_recording_shared_drop_counting() {
        let shared = RecordingShared::new(3);
        assert_eq!(shared.dropped_blocks(), vec![0, 0, 0]);

        shared.count_drop(1);
        shared.count_drop(1);
        shared.count_drop(2);
        assert_eq!(shared.dropped_blocks(), vec![0, 2, 1]);

        // Out-of-range channels are ignored, not a panic.
        shared.count_drop(99);
        assert_eq!(shared.dropped_blocks(), vec![0, 2, 1]);
    }

    #[test]
    fn test_session_creates_one_file_per_channel() {
        let dir = tempdir().unwrap();
        let shared = Arc::new(RecordingShared::new(3));

        let (session, producers) =
            RecordingSession::start(dir.path(), 3, 48000, 4096, Arc::clone(&shared)).unwrap();
        assert!(shared.is_active());
        assert_eq!(producers.len(), 3);

        let session_dir = session.dir().to_path_buf();
        session.stop();
        assert!(!shared.is_active());

        for n in 1..=3 {
            let path = session_dir.join(format!("channel_{n}.wav"));
            assert!(path.exists(), "missing {}", path.display());
            let data = std::fs::read(&path).unwrap();
            assert_eq!(&data[0..4], b"RIFF");
        }
    }

    #[test]
    fn test_session_dir_is_timestamped() {
        let dir = tempdir().unwrap();
        let shared = Arc::new(RecordingShared::new(1));

        let (session, _producers) =
            RecordingSession::start(dir.path(), 1, 48000, 1024, shared).unwrap();

        let name = session.dir().file_name().unwrap().to_string_lossy().to_string();
        session.stop();

        // %Y%m%d_%H%M%S
        assert_eq!(name.len(), 15);
        assert_eq!(name.as_bytes()[8], b'_');
        assert!(name.chars().filter(|c| c.is_ascii_digit()).count() == 14);
    }

    #[test]
    fn test_enqueued_samples_reach_the_file() {
        let dir = tempdir().unwrap();
        let shared = Arc::new(RecordingShared::new(1));

        let (session, mut producers) =
            RecordingSession::start(dir.path(), 1, 48000, 4096, shared).unwrap();

        let block = vec![0.5f32; 128];
        assert_eq!(producers[0].push_slice(&block), 128);

        let session_dir = session.dir().to_path_buf();
        // stop() joins the writer, which performs a final drain first.
        session.stop();

        let data = std::fs::read(session_dir.join("channel_1.wav")).unwrap();
        let data_size = u32::from_le_bytes([data[40], data[41], data[42], data[43]]);
        assert_eq!(data_size, 128 * 3);
    }

    #[test]
    fn test_unreadable_root_is_an_error() {
        let shared = Arc::new(RecordingShared::new(1));
        let result = RecordingSession::start(
            Path::new("/proc/definitely/not/writable"),
            1,
            48000,
            1024,
            shared,
        );
        assert!(matches!(result, Err(RecordError::CreateDir { .. })));
    }
}
