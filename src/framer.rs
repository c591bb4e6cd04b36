//! Resumable line framing over a raw byte stream.
//!
//! One growable buffer with a read cursor and a fill boundary, scanned for a
//! configurable delimiter. The manager protocol frames lines with a strict
//! two-byte CRLF (a lone CR or LF does not terminate a line); FastAGI frames
//! with a single LF. The framer also owns the mid-stream switch to gzip:
//! bytes already buffered but unconsumed at the switch point are replayed
//! through the decompressor so no in-flight line is lost or duplicated.

use flate2::{Decompress, FlushDecompress, Status};
use tracing::trace;

use crate::constants::{INITIAL_LINE_BUFFER, LINE_BUFFER_LIMIT};
use crate::error::{AmiError, AmiResult};
use crate::transport::TimedRead;

/// Line delimiter used by the framer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineDelimiter {
    /// Two-byte `\r\n`, strict: neither byte alone terminates a line.
    CrLf,
    /// Single-byte `\n`.
    Lf,
}

impl LineDelimiter {
    /// Length of the delimiter in bytes.
    fn len(&self) -> usize {
        match self {
            LineDelimiter::CrLf => 2,
            LineDelimiter::Lf => 1,
        }
    }

    /// Position of the first delimiter in `buf[from..end]`, if complete.
    fn find(&self, buf: &[u8], from: usize, end: usize) -> Option<usize> {
        match self {
            LineDelimiter::CrLf => {
                let mut pos = from;
                while pos + 1 < end {
                    if buf[pos] == b'\r' && buf[pos + 1] == b'\n' {
                        return Some(pos);
                    }
                    pos += 1;
                }
                None
            }
            LineDelimiter::Lf => buf[from..end].iter().position(|&b| b == b'\n').map(|i| from + i),
        }
    }
}

/// Streaming gzip decompressor for the mid-stream compression switch.
struct Inflater {
    decompress: Decompress,
    scratch: Vec<u8>,
}

impl Inflater {
    fn new() -> Self {
        Self {
            // 15 window bits, gzip wrapping.
            decompress: Decompress::new_gzip(15),
            scratch: vec![0u8; 16 * 1024],
        }
    }

    /// Decompress `input` fully, returning the produced bytes.
    fn inflate(&mut self, mut input: &[u8]) -> AmiResult<Vec<u8>> {
        let mut out = Vec::new();
        while !input.is_empty() {
            let before_in = self.decompress.total_in();
            let before_out = self.decompress.total_out();
            let status =
                self.decompress
                    .decompress(input, &mut self.scratch, FlushDecompress::None)?;
            let consumed = (self.decompress.total_in() - before_in) as usize;
            let produced = (self.decompress.total_out() - before_out) as usize;
            out.extend_from_slice(&self.scratch[..produced]);
            input = &input[consumed..];

            match status {
                Status::StreamEnd => break,
                // No forward progress means the inflater needs more input
                // than this chunk holds.
                Status::Ok | Status::BufError if consumed == 0 && produced == 0 => break,
                _ => {}
            }
        }
        Ok(out)
    }
}

/// Buffered line reader with a read cursor (`off`) and fill boundary (`end`).
///
/// The buffer starts small and doubles when full with unconsumed bytes at
/// offset 0; when unconsumed bytes sit mid-buffer they are compacted to the
/// left before refilling. Growth past the ceiling raises
/// [`AmiError::OversizedLine`].
pub struct LineFramer {
    delimiter: LineDelimiter,
    buf: Vec<u8>,
    off: usize,
    end: usize,
    limit: usize,
    inflater: Option<Inflater>,
    /// Set after an oversized-line recovery: discard until the next delimiter.
    skipping: bool,
    /// Carries a trailing CR across feeds while skipping (CRLF mode only).
    skip_pending_cr: bool,
}

impl LineFramer {
    /// Create a framer with the default 8MB ceiling.
    pub fn new(delimiter: LineDelimiter) -> Self {
        Self::with_limit(delimiter, LINE_BUFFER_LIMIT)
    }

    /// Create a framer with a custom buffer ceiling (useful in tests).
    pub fn with_limit(delimiter: LineDelimiter, limit: usize) -> Self {
        Self {
            delimiter,
            buf: vec![0u8; INITIAL_LINE_BUFFER.min(limit)],
            off: 0,
            end: 0,
            limit,
            inflater: None,
            skipping: false,
            skip_pending_cr: false,
        }
    }

    /// Number of buffered, unconsumed bytes.
    pub fn buffered(&self) -> usize {
        self.end - self.off
    }

    /// Whether the gzip switch has happened.
    pub fn is_compressed(&self) -> bool {
        self.inflater.is_some()
    }

    /// Append raw bytes from the transport. Decompresses first when the
    /// gzip switch is active.
    pub fn feed(&mut self, data: &[u8]) -> AmiResult<()> {
        let data = if self.skipping {
            match self.skip_to_delimiter(data) {
                Some(rest) => rest,
                None => return Ok(()),
            }
        } else {
            data.to_vec()
        };

        let data = match self.inflater.as_mut() {
            Some(inflater) => inflater.inflate(&data)?,
            None => data,
        };
        self.append(&data)
    }

    /// Pop the next complete line from the buffer, delimiter stripped.
    ///
    /// An invalid UTF-8 line is consumed (the cursor advances past it) and
    /// reported as [`AmiError::MalformedMessage`], so the caller can skip it
    /// and keep the session alive.
    pub fn next_line(&mut self) -> AmiResult<Option<String>> {
        let Some(pos) = self.delimiter.find(&self.buf, self.off, self.end) else {
            // No complete line. An unconsumed run at the ceiling can never
            // complete; flag it instead of waiting for more bytes forever.
            if self.buffered() >= self.limit {
                return Err(AmiError::OversizedLine { limit: self.limit });
            }
            return Ok(None);
        };

        let raw = self.buf[self.off..pos].to_vec();
        self.off = pos + self.delimiter.len();
        if self.off == self.end {
            self.off = 0;
            self.end = 0;
        }

        match String::from_utf8(raw) {
            Ok(line) => {
                trace!("[FRAMER] line: {:?}", line);
                Ok(Some(line))
            }
            Err(_) => Err(AmiError::malformed("invalid UTF-8 in line")),
        }
    }

    /// Switch the byte source to gzip. Permitted exactly once; bytes already
    /// buffered but unconsumed are the head of the compressed stream and are
    /// replayed through the fresh decompressor.
    pub fn switch_to_compressed(&mut self) -> AmiResult<()> {
        if self.inflater.is_some() {
            return Err(AmiError::AlreadyCompressed);
        }

        let leftover = self.buf[self.off..self.end].to_vec();
        self.off = 0;
        self.end = 0;
        self.inflater = Some(Inflater::new());

        if !leftover.is_empty() {
            trace!(
                "[FRAMER] replaying {} buffered bytes through gzip",
                leftover.len()
            );
            self.feed(&leftover)?;
        }
        Ok(())
    }

    /// Recover after [`AmiError::OversizedLine`]: the partial line is dropped
    /// and everything up to (and including) the next delimiter is discarded,
    /// after which framing resumes with the following line.
    pub fn recover_oversized(&mut self) {
        self.off = 0;
        self.end = 0;
        self.skipping = true;
        self.skip_pending_cr = false;
    }

    /// While skipping, scan `data` for the delimiter. Returns the bytes
    /// after it once found.
    fn skip_to_delimiter(&mut self, data: &[u8]) -> Option<Vec<u8>> {
        match self.delimiter {
            LineDelimiter::Lf => data
                .iter()
                .position(|&b| b == b'\n')
                .map(|i| {
                    self.skipping = false;
                    data[i + 1..].to_vec()
                }),
            LineDelimiter::CrLf => {
                let mut i = 0;
                while i < data.len() {
                    if self.skip_pending_cr && data[i] == b'\n' {
                        self.skipping = false;
                        self.skip_pending_cr = false;
                        return Some(data[i + 1..].to_vec());
                    }
                    self.skip_pending_cr = data[i] == b'\r';
                    i += 1;
                }
                None
            }
        }
    }

    fn append(&mut self, data: &[u8]) -> AmiResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        // Reset offsets when drained.
        if self.off == self.end {
            self.off = 0;
            self.end = 0;
        }

        if self.end + data.len() > self.buf.len() {
            // Move unconsumed bytes to the left before considering growth.
            if self.off > 0 {
                self.buf.copy_within(self.off..self.end, 0);
                self.end -= self.off;
                self.off = 0;
            }
            while self.end + data.len() > self.buf.len() {
                let new_len = self.buf.len() * 2;
                if new_len > self.limit {
                    return Err(AmiError::OversizedLine { limit: self.limit });
                }
                self.buf.resize(new_len, 0);
            }
        }

        self.buf[self.end..self.end + data.len()].copy_from_slice(data);
        self.end += data.len();
        Ok(())
    }
}

impl std::fmt::Debug for LineFramer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineFramer")
            .field("delimiter", &self.delimiter)
            .field("buffered", &self.buffered())
            .field("capacity", &self.buf.len())
            .field("compressed", &self.is_compressed())
            .finish()
    }
}

/// Read the next logical line from `source` through `framer`.
///
/// Returns `Ok(None)` at clean end-of-stream; a partial line left in the
/// buffer at EOF is discarded, matching the wire contract that every line is
/// delimiter-terminated.
pub(crate) async fn read_line<S: TimedRead>(
    source: &mut S,
    framer: &mut LineFramer,
    read_buffer: &mut [u8],
) -> AmiResult<Option<String>> {
    loop {
        match framer.next_line() {
            Ok(Some(line)) => return Ok(Some(line)),
            Ok(None) => {}
            Err(e) => return Err(e),
        }

        let n = match source.read(read_buffer).await {
            Ok(n) => n,
            Err(AmiError::ConnectionClosed) => return Ok(None),
            Err(e) => return Err(e),
        };
        framer.feed(&read_buffer[..n])?;
    }
}
