//! Streaming sensitive-data masking.
//!
//! A [`SensitiveMask`] holds an ordered set of secrets and one replacement
//! token. [`MaskingWriter`] wraps any [`Write`] sink and replaces every secret
//! with the token before bytes reach the sink, including secrets split across
//! several writes. Output may lag until a line boundary or the flush
//! threshold is reached; it never contains a prefix of a secret that might
//! still complete.

use std::io::{self, Write};
use std::sync::{Arc, PoisonError, RwLock};

use crate::service::Service;

/// Replacement written in place of a secret unless configured otherwise.
pub const DEFAULT_REPLACEMENT: &str = "****";

/// Buffered bytes after which a masking writer flushes without a boundary.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 4096;

/// Ordered set of secrets plus their replacement token.
///
/// The secret list only grows. Reads and additions are serialised through a
/// lock so one mask can be shared by many concurrently-writing streams.
/// `Clone` performs a deep copy, letting a base mask be specialised per
/// stream without affecting the original.
///
/// # Example
///
/// ```
/// use std::io::Write;
/// use std::sync::Arc;
///
/// use marshal_core::SensitiveMask;
///
/// let mask = Arc::new(SensitiveMask::new());
/// mask.add_secret("hunter2");
///
/// let mut writer = mask.writer(Vec::new());
/// writer.write_all(b"password: hun").expect("write");
/// writer.write_all(b"ter2\n").expect("write");
/// let output = writer.close().expect("close");
/// assert_eq!(output, b"password: ****\n");
/// ```
#[derive(Debug)]
pub struct SensitiveMask {
    secrets: RwLock<Vec<Vec<u8>>>,
    replacement: Vec<u8>,
}

impl Default for SensitiveMask {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for SensitiveMask {
    fn clone(&self) -> Self {
        Self {
            secrets: RwLock::new(self.read_secrets().clone()),
            replacement: self.replacement.clone(),
        }
    }
}

impl Service for SensitiveMask {}

impl SensitiveMask {
    /// Creates an empty mask using [`DEFAULT_REPLACEMENT`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_replacement(DEFAULT_REPLACEMENT)
    }

    /// Creates an empty mask with a custom replacement token.
    #[must_use]
    pub fn with_replacement(replacement: impl Into<Vec<u8>>) -> Self {
        Self {
            secrets: RwLock::new(Vec::new()),
            replacement: replacement.into(),
        }
    }

    /// Adds a secret. Empty and already-known secrets are ignored.
    pub fn add_secret(&self, secret: impl AsRef<[u8]>) {
        let bytes = secret.as_ref();
        if bytes.is_empty() {
            return;
        }
        let mut secrets = self
            .secrets
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if !secrets.iter().any(|known| known.as_slice() == bytes) {
            secrets.push(bytes.to_vec());
        }
    }

    /// Number of configured secrets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read_secrets().len()
    }

    /// Returns `true` when no secret is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read_secrets().is_empty()
    }

    /// Replacement token.
    #[must_use]
    pub fn replacement(&self) -> &[u8] {
        &self.replacement
    }

    /// Wraps `sink` in a [`MaskingWriter`] sharing this mask.
    #[must_use]
    pub fn writer<W: Write>(self: &Arc<Self>, sink: W) -> MaskingWriter<W> {
        MaskingWriter::new(Arc::clone(self), sink)
    }

    /// Masks a complete string in one pass.
    #[must_use]
    pub fn mask_str(&self, text: &str) -> String {
        let (masked, _) = self.replace_all(text.as_bytes());
        String::from_utf8_lossy(&masked).into_owned()
    }

    /// Replaces every secret in `input`.
    ///
    /// Scanning proceeds left to right, always taking the earliest-starting
    /// occurrence; when several secrets start at the same index the one added
    /// first wins. Returns the masked bytes and the end offset, within them,
    /// of the last replacement made.
    #[must_use]
    pub fn replace_all(&self, input: &[u8]) -> (Vec<u8>, Option<usize>) {
        let secrets = self.read_secrets();
        let mut output = Vec::with_capacity(input.len());
        let mut last_end = None;
        let mut rest = input;

        while let Some((start, length)) = earliest_match(&secrets, rest) {
            let (head, tail) = rest.split_at(start);
            output.extend_from_slice(head);
            output.extend_from_slice(&self.replacement);
            last_end = Some(output.len());
            rest = tail.get(length..).unwrap_or_default();
        }
        output.extend_from_slice(rest);
        (output, last_end)
    }

    /// Returns the start of the earliest suffix of `buffer` that is a strict,
    /// non-empty prefix of a secret longer than one byte.
    #[must_use]
    pub fn partial_match_start(&self, buffer: &[u8]) -> Option<usize> {
        let secrets = self.read_secrets();
        let longest = secrets.iter().map(Vec::len).max()?;
        let first_candidate = buffer.len().saturating_sub(longest.saturating_sub(1));
        (first_candidate..buffer.len()).find(|start| {
            let tail = buffer.get(*start..).unwrap_or_default();
            secrets.iter().any(|secret| {
                secret.len() > 1 && tail.len() < secret.len() && secret.starts_with(tail)
            })
        })
    }

    fn read_secrets(&self) -> std::sync::RwLockReadGuard<'_, Vec<Vec<u8>>> {
        self.secrets.read().unwrap_or_else(PoisonError::into_inner)
    }
}

fn earliest_match(secrets: &[Vec<u8>], haystack: &[u8]) -> Option<(usize, usize)> {
    secrets
        .iter()
        .filter_map(|secret| find(haystack, secret).map(|start| (start, secret.len())))
        .fold(None, |best, candidate| match best {
            Some((start, _)) if start <= candidate.0 => best,
            _ => Some(candidate),
        })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn has_boundary(bytes: &[u8]) -> bool {
    bytes.iter().any(|byte| matches!(byte, b'\n' | b'\r' | b'\t'))
}

/// Writer that masks secrets before forwarding bytes to its sink.
///
/// Call [`MaskingWriter::close`] to force out buffered bytes and recover the
/// sink. [`Write::flush`] only flushes the sink; it never releases bytes that
/// might still be part of a secret. Dropping the writer performs a
/// best-effort close. When the sink fails, the bytes it refused stay
/// buffered and go out with the next successful write or close, so callers
/// must not resend them.
#[derive(Debug)]
pub struct MaskingWriter<W: Write> {
    mask: Arc<SensitiveMask>,
    sink: Option<W>,
    buffer: Vec<u8>,
    threshold: usize,
}

impl<W: Write> MaskingWriter<W> {
    /// Wraps `sink`, masking with `mask`.
    #[must_use]
    pub fn new(mask: Arc<SensitiveMask>, sink: W) -> Self {
        Self {
            mask,
            sink: Some(sink),
            buffer: Vec::new(),
            threshold: DEFAULT_FLUSH_THRESHOLD,
        }
    }

    /// Overrides the flush threshold.
    #[must_use]
    pub fn with_flush_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    /// Bytes held back waiting for a boundary or a secret to complete.
    #[must_use]
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Borrows the sink.
    #[must_use]
    pub fn get_ref(&self) -> Option<&W> {
        self.sink.as_ref()
    }

    /// Masks and writes everything still buffered, flushes the sink and
    /// returns it.
    ///
    /// # Errors
    ///
    /// Returns any error raised by the sink.
    pub fn close(mut self) -> io::Result<W> {
        self.finish()?;
        self.sink
            .take()
            .ok_or_else(|| io::Error::other("masking writer already closed"))
    }

    fn finish(&mut self) -> io::Result<()> {
        let Some(sink) = self.sink.as_mut() else {
            return Ok(());
        };
        let (masked, _) = self.mask.replace_all(&self.buffer);
        sink.write_all(&masked)?;
        self.buffer.clear();
        sink.flush()
    }

    fn emit(&mut self, end: usize) -> io::Result<()> {
        if end == 0 {
            return Ok(());
        }
        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| io::Error::other("masking writer already closed"))?;
        let head = self
            .buffer
            .get(..end)
            .ok_or_else(|| io::Error::other("masked output ends before the flush point"))?;
        sink.write_all(head)?;
        self.buffer.drain(..end);
        Ok(())
    }
}

impl<W: Write> Write for MaskingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        let (masked, last_replacement) = self.mask.replace_all(&self.buffer);
        self.buffer = masked;

        if let Some(end) = last_replacement {
            self.emit(end)?;
        } else if has_boundary(buf) || self.buffer.len() >= self.threshold {
            let buffered = self.buffer.len();
            let safe = self
                .mask
                .partial_match_start(&self.buffer)
                .unwrap_or(buffered);
            self.emit(safe)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.as_mut().map_or(Ok(()), Write::flush)
    }
}

impl<W: Write> Drop for MaskingWriter<W> {
    fn drop(&mut self) {
        drop(self.finish());
    }
}
