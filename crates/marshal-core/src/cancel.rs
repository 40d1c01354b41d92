//! Cooperative cancellation shared by discovery and action execution.
//!
//! A [`CancellationToken`] is created once per invocation and handed down
//! through discovery and execution. Child tokens add their own deadline and
//! observe their parent, so cancelling the invocation stops everything below
//! it. [`CancellableReader`] lets a blocked input read return as soon as the
//! token fires.

use std::io::{self, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

/// Interval at which blocked operations re-check their token.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

const READ_CHUNK: usize = 8 * 1024;

/// Cancellation flag with an optional deadline and parent.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenState>,
}

#[derive(Debug, Default)]
struct TokenState {
    cancelled: AtomicBool,
    deadline: Option<Instant>,
    parent: Option<CancellationToken>,
}

impl CancellationToken {
    /// Creates a token with no deadline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a token that cancels itself after `timeout`.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(TokenState {
                cancelled: AtomicBool::new(false),
                deadline: Instant::now().checked_add(timeout),
                parent: None,
            }),
        }
    }

    /// Creates a child that fires after `timeout` or when `self` fires.
    #[must_use]
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(TokenState {
                cancelled: AtomicBool::new(false),
                deadline: Instant::now().checked_add(timeout),
                parent: Some(self.clone()),
            }),
        }
    }

    /// Cancels this token and every child derived from it.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once the token, its deadline or any ancestor fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
            || self
                .inner
                .deadline
                .is_some_and(|deadline| Instant::now() >= deadline)
            || self
                .inner
                .parent
                .as_ref()
                .is_some_and(Self::is_cancelled)
    }

    /// Time left before the nearest deadline, if any applies.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        let own = self
            .inner
            .deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()));
        let inherited = self.inner.parent.as_ref().and_then(Self::remaining);
        match (own, inherited) {
            (Some(left), Some(right)) => Some(left.min(right)),
            (left, right) => left.or(right),
        }
    }
}

/// Reader whose blocking reads return an error once a token is cancelled.
///
/// The wrapped reader is pumped by a background thread. On cancellation the
/// pump is abandoned, not interrupted: a read already blocked in the
/// underlying source keeps the thread and the source alive until that read
/// returns. Once this reader is dropped the next chunk the pump produces
/// fails to send and the source is dropped with the thread. A source that
/// never returns, such as an idle terminal, is held until process exit.
#[derive(Debug)]
pub struct CancellableReader {
    chunks: Receiver<io::Result<Vec<u8>>>,
    pending: Vec<u8>,
    cancel: CancellationToken,
    finished: bool,
}

impl CancellableReader {
    /// Starts pumping `reader` in the background.
    ///
    /// # Errors
    ///
    /// Returns an error if the pump thread cannot be spawned.
    pub fn spawn<R>(reader: R, cancel: CancellationToken) -> io::Result<Self>
    where
        R: Read + Send + 'static,
    {
        let (sender, chunks) = mpsc::sync_channel(1);
        thread::Builder::new()
            .name(String::from("marshal-input"))
            .spawn(move || pump(reader, &sender))?;
        Ok(Self {
            chunks,
            pending: Vec::new(),
            cancel,
            finished: false,
        })
    }

    fn fill(&mut self) -> io::Result<()> {
        while self.pending.is_empty() && !self.finished {
            if self.cancel.is_cancelled() {
                return Err(io::Error::other("input read cancelled"));
            }
            match self.chunks.recv_timeout(POLL_INTERVAL) {
                Ok(Ok(chunk)) if chunk.is_empty() => self.finished = true,
                Ok(Ok(chunk)) => self.pending = chunk,
                Ok(Err(error)) => {
                    self.finished = true;
                    return Err(error);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => self.finished = true,
            }
        }
        Ok(())
    }
}

impl Read for CancellableReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.fill()?;
        let count = buf.len().min(self.pending.len());
        let (target, _) = buf.split_at_mut(count);
        target.copy_from_slice(self.pending.get(..count).unwrap_or_default());
        self.pending.drain(..count);
        Ok(count)
    }
}

fn pump<R: Read>(mut reader: R, sender: &mpsc::SyncSender<io::Result<Vec<u8>>>) {
    loop {
        let mut chunk = vec![0_u8; READ_CHUNK];
        match reader.read(&mut chunk) {
            Ok(0) => {
                drop(sender.send(Ok(Vec::new())));
                return;
            }
            Ok(count) => {
                chunk.truncate(count);
                if sender.send(Ok(chunk)).is_err() {
                    return;
                }
            }
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => {
                drop(sender.send(Err(error)));
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    struct Blocking;

    impl Read for Blocking {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            thread::sleep(Duration::from_secs(60));
            Ok(0)
        }
    }

    struct Endless {
        released: Arc<AtomicBool>,
    }

    impl Read for Endless {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            buf.fill(b'x');
            Ok(buf.len())
        }
    }

    impl Drop for Endless {
        fn drop(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn cancel_propagates_to_children() {
        let parent = CancellationToken::new();
        let child = parent.child_with_timeout(Duration::from_secs(60));
        assert!(!child.is_cancelled());
        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn deadline_expires_the_token() {
        let token = CancellationToken::with_timeout(Duration::ZERO);
        assert!(token.is_cancelled());
        assert_eq!(token.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn remaining_takes_the_nearest_deadline() {
        let parent = CancellationToken::with_timeout(Duration::from_secs(1));
        let child = parent.child_with_timeout(Duration::from_secs(3600));
        let left = child.remaining().expect("deadline");
        assert!(left <= Duration::from_secs(1));
        assert_eq!(CancellationToken::new().remaining(), None);
    }

    #[test]
    fn reader_passes_data_through() {
        let mut reader =
            CancellableReader::spawn(Cursor::new(b"payload".to_vec()), CancellationToken::new())
                .expect("spawn");
        let mut text = String::new();
        reader.read_to_string(&mut text).expect("read");
        assert_eq!(text, "payload");
    }

    #[test]
    fn cancellation_unblocks_a_pending_read() {
        let token = CancellationToken::new();
        let mut reader = CancellableReader::spawn(Blocking, token.clone()).expect("spawn");
        let canceller = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            canceller.cancel();
        });
        let started = Instant::now();
        let mut buf = [0_u8; 4];
        let error = reader.read(&mut buf).expect_err("read must be cancelled");
        assert_eq!(error.kind(), io::ErrorKind::Other);
        assert!(started.elapsed() < Duration::from_secs(5));
        handle.join().expect("join");
    }

    #[test]
    fn dropping_the_reader_releases_the_source() {
        let released = Arc::new(AtomicBool::new(false));
        let token = CancellationToken::new();
        let source = Endless {
            released: Arc::clone(&released),
        };
        let mut reader = CancellableReader::spawn(source, token.clone()).expect("spawn");
        let mut buf = [0_u8; 4];
        reader.read(&mut buf).expect("first read");
        token.cancel();
        drop(reader);

        let started = Instant::now();
        while !released.load(Ordering::SeqCst) && started.elapsed() < Duration::from_secs(5) {
            thread::sleep(POLL_INTERVAL);
        }
        assert!(released.load(Ordering::SeqCst), "pump kept the source alive");
    }
}
