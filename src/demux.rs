//! The demultiplexing state machine.
//!
//! [`Demultiplexer`] consumes raw transport chunks and produces a sequence of
//! [`Part`]s on a bounded channel, feeding each part's body bytes into its
//! own bounded sink as they are recognized. It is owned exclusively by one
//! pump task; every chunk arrival is serialized through that owner, and
//! backpressure is the suspension of its channel sends.
//!
//! The machine has two modes. In `Boundary` mode it searches a two-slot
//! rolling window of chunks for the next boundary marker; a marker can span
//! the split between the two slots, and a chunk smaller than the terminal
//! marker is merged into a side cache until enough bytes exist to search
//! safely. In `Header` mode it accumulates bytes until the blank line that
//! ends a part's header block, then constructs and announces the part.

use std::io;

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt, pin_mut};
use log::{debug, trace};
use memchr::memmem;
use tokio::sync::mpsc;

use crate::error::MultipartError;
use crate::header::PartHeader;
use crate::part::{Field, File, Part, PartBody};

/// Default ceiling for the accumulating header buffer (10 MB).
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 10_000_000;

const CRLF: &[u8] = b"\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";

/// Capacity of the announced-parts channel, in parts.
pub(crate) const PART_CHANNEL_CAPACITY: usize = 8;
/// Capacity of each part's body sink, in chunks.
pub(crate) const BODY_CHANNEL_CAPACITY: usize = 32;

/// Resource limits for one multipart stream.
///
/// Unset limits are unbounded. Every violation is fatal to the whole stream.
#[derive(Debug, Clone)]
pub struct MultipartConfig {
    max_buffer_size: usize,
    max_total_size: Option<usize>,
    max_file_size: Option<usize>,
    max_field_size: Option<usize>,
    max_files: Option<usize>,
    max_fields: Option<usize>,
}

impl Default for MultipartConfig {
    fn default() -> Self {
        Self {
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            max_total_size: None,
            max_file_size: None,
            max_field_size: None,
            max_files: None,
            max_fields: None,
        }
    }
}

impl MultipartConfig {
    /// Create a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the header-buffer ceiling.
    #[must_use]
    pub fn max_buffer_size(mut self, size: usize) -> Self {
        self.max_buffer_size = size;
        self
    }

    /// Limit the cumulative size of the whole request.
    #[must_use]
    pub fn max_total_size(mut self, size: usize) -> Self {
        self.max_total_size = Some(size);
        self
    }

    /// Limit the size of any single file part.
    #[must_use]
    pub fn max_file_size(mut self, size: usize) -> Self {
        self.max_file_size = Some(size);
        self
    }

    /// Limit the size of any single field part.
    #[must_use]
    pub fn max_field_size(mut self, size: usize) -> Self {
        self.max_field_size = Some(size);
        self
    }

    /// Limit the number of file parts.
    #[must_use]
    pub fn max_files(mut self, count: usize) -> Self {
        self.max_files = Some(count);
        self
    }

    /// Limit the number of field parts.
    #[must_use]
    pub fn max_fields(mut self, count: usize) -> Self {
        self.max_fields = Some(count);
        self
    }

    /// Get the header-buffer ceiling.
    #[must_use]
    pub fn get_max_buffer_size(&self) -> usize {
        self.max_buffer_size
    }

    /// Get the cumulative request size limit, if set.
    #[must_use]
    pub fn get_max_total_size(&self) -> Option<usize> {
        self.max_total_size
    }

    /// Get the per-file size limit, if set.
    #[must_use]
    pub fn get_max_file_size(&self) -> Option<usize> {
        self.max_file_size
    }

    /// Get the per-field size limit, if set.
    #[must_use]
    pub fn get_max_field_size(&self) -> Option<usize> {
        self.max_field_size
    }

    /// Get the file count limit, if set.
    #[must_use]
    pub fn get_max_files(&self) -> Option<usize> {
        self.max_files
    }

    /// Get the field count limit, if set.
    #[must_use]
    pub fn get_max_fields(&self) -> Option<usize> {
        self.max_fields
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Searching the rolling window for the next boundary marker.
    Boundary,
    /// Accumulating a part's header block until the blank line ends it.
    Header,
}

pub(crate) struct Demultiplexer {
    /// `--<token>`.
    boundary: Vec<u8>,
    /// `--<token>--`.
    end_boundary: Vec<u8>,
    mode: Mode,
    /// At most two searchable chunks, plus a flushed cache entry at
    /// end-of-input. Used only in `Boundary` mode.
    internal: Vec<Bytes>,
    /// False once the rolling window has evicted at least one chunk; gates
    /// the search-offset optimization.
    internal_fresh: bool,
    /// True once the leading window slot was delivered as body data, so a
    /// forced re-scan can never deliver it twice.
    leading_sent: bool,
    /// Cached concatenation of `internal`, rebuilt on demand.
    data_cache: Bytes,
    data_dirty: bool,
    /// Aggregates chunks shorter than the terminal marker; such a chunk
    /// cannot be searched on its own.
    chunk_cache: BytesMut,
    /// Raw header bytes. Used only in `Header` mode.
    header_buffer: BytesMut,
    current_header: Option<PartHeader>,
    current_sink: Option<mpsc::Sender<Bytes>>,
    config: MultipartConfig,
    current_part_size: usize,
    total_size: usize,
    files_seen: usize,
    fields_seen: usize,
    request_finished: bool,
    end_reached: bool,
    parts_tx: mpsc::Sender<Result<Part, MultipartError>>,
}

impl Demultiplexer {
    pub(crate) fn new(
        token: &str,
        config: MultipartConfig,
        parts_tx: mpsc::Sender<Result<Part, MultipartError>>,
    ) -> Self {
        let boundary = format!("--{token}").into_bytes();
        let end_boundary = format!("--{token}--").into_bytes();
        Self {
            boundary,
            end_boundary,
            mode: Mode::Boundary,
            internal: Vec::with_capacity(2),
            internal_fresh: true,
            leading_sent: false,
            data_cache: Bytes::new(),
            data_dirty: true,
            chunk_cache: BytesMut::new(),
            header_buffer: BytesMut::new(),
            current_header: None,
            current_sink: None,
            config,
            current_part_size: 0,
            total_size: 0,
            files_seen: 0,
            fields_seen: 0,
            request_finished: false,
            end_reached: false,
            parts_tx,
        }
    }

    /// Pump the upstream source through the state machine until the terminal
    /// boundary, an error, or the consumer going away. Fatal errors are
    /// surfaced once on the parts channel; dropping `self` afterwards closes
    /// the channel and any open part sink.
    pub(crate) async fn run<S>(mut self, stream: S)
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        pin_mut!(stream);
        if let Err(err) = self.pump(&mut stream).await {
            debug!("multipart stream failed: {err}");
            let _ = self.parts_tx.send(Err(err)).await;
        }
    }

    async fn pump<S>(&mut self, stream: &mut std::pin::Pin<&mut S>) -> Result<(), MultipartError>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        while let Some(next) = stream.next().await {
            let chunk = next.map_err(|err| MultipartError::Payload {
                detail: err.to_string(),
            })?;
            self.handle_chunk(Some(chunk), false).await?;
            if self.end_reached {
                return Ok(());
            }
        }

        self.request_finished = true;
        // A sole buffered chunk was never searched, and a pending cache or
        // header buffer may still hold a split terminal marker.
        if self.internal.len() == 1
            || !self.chunk_cache.is_empty()
            || self.mode == Mode::Header
        {
            self.handle_chunk(None, true).await?;
        }
        if self.end_reached {
            Ok(())
        } else {
            Err(MultipartError::Incomplete)
        }
    }

    /// One dispatch step, re-run with a forced flush while header processing
    /// asks for it (end-of-input with a final part still buffered).
    async fn handle_chunk(
        &mut self,
        chunk: Option<Bytes>,
        force: bool,
    ) -> Result<(), MultipartError> {
        let mut run_again = self.process(chunk, force).await?;
        while run_again {
            run_again = self.process(None, true).await?;
        }
        Ok(())
    }

    /// Main dispatch: ingest one chunk (or a flush marker), then advance the
    /// state machine as far as the buffered bytes allow. Returns true when
    /// the caller should immediately re-invoke with a forced flush.
    async fn process(&mut self, chunk: Option<Bytes>, force: bool) -> Result<bool, MultipartError> {
        if self.end_reached {
            return Ok(false);
        }
        if !self.buffer_chunk(chunk, true)? {
            // Not enough bytes to search safely yet.
            return Ok(false);
        }

        if self.mode == Mode::Boundary {
            // A boundary can span two chunks, so wait for the second one
            // unless end-of-input forces a final scan.
            if self.internal.len() < 2 && !force {
                return Ok(false);
            }

            let index = self.next_boundary_index();
            self.end_reached = self.is_end_boundary(index);

            if let Some(index) = index {
                self.mode = Mode::Header;
                let data = self.data();
                if self.current_sink.is_some() {
                    // Everything before the boundary, minus the CRLF that
                    // precedes it, belongs to the open part. The leading
                    // window slot may already have been delivered.
                    let body_start = if self.leading_sent {
                        self.internal.first().map_or(0, Bytes::len)
                    } else {
                        0
                    };
                    let body_end = index.saturating_sub(CRLF.len());
                    if body_end > body_start {
                        self.send_body(data.slice(body_start..body_end)).await;
                    }
                    self.close_current_part();
                }
                if !self.end_reached {
                    self.header_buffer.clear();
                    self.header_buffer.extend_from_slice(&data[index..]);
                }
            } else if self.current_sink.is_some() {
                // No boundary in the window: the first slot is pure body
                // data. It stays in the window for the next spanning search;
                // `leading_sent` keeps it from being delivered again.
                if !self.leading_sent {
                    if let Some(first) = self.internal.first().cloned() {
                        self.leading_sent = true;
                        self.send_body(first).await;
                    }
                }
            }
            // Without an open part, bytes before the first boundary are
            // preamble and age out of the window unsent.
        }

        if self.end_reached {
            trace!("terminal boundary reached after {} bytes", self.total_size);
            return Ok(false);
        }

        if self.mode == Mode::Header {
            self.reset_window();

            // The scan window may have ended inside the terminal marker, in
            // which case it was seeded here looking like a part boundary.
            if self.header_buffer.len() >= self.end_boundary.len()
                && self.header_buffer.starts_with(&self.end_boundary)
            {
                self.end_reached = true;
                self.header_buffer.clear();
                trace!("terminal boundary reached after {} bytes", self.total_size);
                return Ok(false);
            }

            if let Some(end) = memmem::find(&self.header_buffer, HEADER_END) {
                self.process_header(end).await?;
                // With the upstream already done, no further chunk will
                // arrive to flush the part just announced.
                return Ok(self.request_finished && !self.end_reached);
            }
        }

        Ok(false)
    }

    /// Chunk ingestion. A `None` chunk flushes the undersized-chunk cache
    /// into the window. Returns false when the buffered bytes are still too
    /// short to search.
    fn buffer_chunk(&mut self, chunk: Option<Bytes>, count_total: bool) -> Result<bool, MultipartError> {
        let Some(chunk) = chunk else {
            if !self.chunk_cache.is_empty() {
                let cached = self.chunk_cache.split().freeze();
                self.internal.push(cached);
                self.data_dirty = true;
            }
            return Ok(true);
        };

        self.increment_size(chunk.len(), count_total)?;

        match self.mode {
            Mode::Header => {
                self.header_buffer.extend_from_slice(&chunk);
                if self.header_buffer.len() > self.config.max_buffer_size {
                    return Err(MultipartError::BufferTooLarge {
                        size: self.header_buffer.len(),
                        max: self.config.max_buffer_size,
                    });
                }
                Ok(true)
            }
            Mode::Boundary => {
                self.data_dirty = true;
                let chunk = if !self.chunk_cache.is_empty()
                    || chunk.len() < self.end_boundary.len()
                {
                    self.chunk_cache.extend_from_slice(&chunk);
                    if self.chunk_cache.len() < self.end_boundary.len() {
                        return Ok(false);
                    }
                    self.chunk_cache.split().freeze()
                } else {
                    chunk
                };

                if self.internal.len() < 2 {
                    self.internal.push(chunk);
                } else {
                    self.internal.remove(0);
                    self.internal.push(chunk);
                    self.internal_fresh = false;
                    self.leading_sent = false;
                }
                Ok(true)
            }
        }
    }

    fn increment_size(&mut self, bytes: usize, count_total: bool) -> Result<(), MultipartError> {
        self.current_part_size += bytes;
        if count_total {
            self.total_size += bytes;
        }

        if let Some(max) = self.config.max_total_size {
            if self.total_size > max {
                return Err(MultipartError::TotalTooLarge {
                    size: self.total_size,
                    max,
                });
            }
        }

        let Some(header) = &self.current_header else {
            return Ok(());
        };
        if header.is_file() {
            if let Some(max) = self.config.max_file_size {
                if self.current_part_size > max {
                    return Err(MultipartError::FileTooLarge {
                        name: header
                            .filename()
                            .or_else(|| header.name())
                            .unwrap_or_default()
                            .to_string(),
                        size: self.current_part_size,
                        max,
                    });
                }
            }
        } else if let Some(max) = self.config.max_field_size {
            if self.current_part_size > max {
                return Err(MultipartError::FieldTooLarge {
                    name: header.name().unwrap_or_default().to_string(),
                    size: self.current_part_size,
                    max,
                });
            }
        }
        Ok(())
    }

    /// Concatenation of the window chunks, cached until the window changes.
    fn data(&mut self) -> Bytes {
        if self.data_dirty {
            let total = self.internal.iter().map(Bytes::len).sum();
            let mut buf = BytesMut::with_capacity(total);
            for chunk in &self.internal {
                buf.extend_from_slice(chunk);
            }
            self.data_cache = buf.freeze();
            self.data_dirty = false;
        }
        self.data_cache.clone()
    }

    /// Offset from which the boundary search must start.
    ///
    /// Once the window has evicted a chunk, its first slot was fully covered
    /// by the previous search, so only its last terminal-marker-length bytes
    /// can still begin an unseen marker that spans into the second slot.
    fn search_offset(&self) -> usize {
        if self.internal_fresh || self.internal.len() < 2 {
            return 0;
        }
        let end_len = self.end_boundary.len();
        if self.internal[0].len() <= end_len || self.internal[1].len() <= end_len {
            return 0;
        }
        self.internal[0].len() - end_len
    }

    fn next_boundary_index(&mut self) -> Option<usize> {
        let offset = self.search_offset();
        let data = self.data();
        if offset >= data.len() {
            return None;
        }
        memmem::find(&data[offset..], &self.boundary).map(|found| found + offset)
    }

    fn is_end_boundary(&mut self, index: Option<usize>) -> bool {
        let Some(index) = index else {
            return false;
        };
        let data = self.data();
        let end = index + self.end_boundary.len();
        end <= data.len() && data[index..end] == *self.end_boundary
    }

    fn reset_window(&mut self) {
        self.internal.clear();
        self.internal_fresh = true;
        self.leading_sent = false;
        self.data_dirty = true;
    }

    async fn send_body(&mut self, bytes: Bytes) {
        let Some(sink) = self.current_sink.clone() else {
            return;
        };
        if sink.send(bytes).await.is_err() {
            // The consumer dropped the part; discard the rest of its body.
            self.current_sink = None;
        }
    }

    fn close_current_part(&mut self) {
        // Dropping the sender closes the sink exactly once; the consumer's
        // drain sees end-of-body.
        self.current_sink = None;
    }

    /// Construct and announce the part for a completed header block, then
    /// route any bytes beyond the terminator back through chunk ingestion as
    /// body data for the new part.
    async fn process_header(&mut self, header_end: usize) -> Result<(), MultipartError> {
        self.current_part_size = 0;

        let content_start = self.boundary.len() + CRLF.len();
        let header = if header_end > content_start {
            PartHeader::new(&self.header_buffer[content_start..header_end])
        } else {
            PartHeader::new(&[])
        };

        self.mode = Mode::Boundary;

        let remaining = self
            .header_buffer
            .split_off(header_end + HEADER_END.len())
            .freeze();
        self.header_buffer.clear();

        self.announce_part(header).await?;

        if !remaining.is_empty() {
            // Already counted against the total when it arrived inside the
            // header block; it still counts toward the new part's size.
            self.buffer_chunk(Some(remaining), false)?;
        }
        Ok(())
    }

    async fn announce_part(&mut self, header: PartHeader) -> Result<(), MultipartError> {
        let (sink, body) = mpsc::channel(BODY_CHANNEL_CAPACITY);
        let body = PartBody::new(body);

        let part = if header.is_file() {
            self.files_seen += 1;
            Part::File(File::new(
                header.name(),
                header.content_type(),
                header.filename(),
                body,
            ))
        } else {
            self.fields_seen += 1;
            Part::Field(Field::new(header.name(), header.content_type(), body))
        };
        self.check_max_parts()?;

        debug!(
            "announcing {} part (name: {:?})",
            if part.is_file() { "file" } else { "field" },
            part.name()
        );
        self.current_sink = Some(sink);
        self.current_header = Some(header);

        if self.parts_tx.send(Ok(part)).await.is_err() {
            // The consumer dropped the whole stream; stop quietly.
            self.end_reached = true;
            self.current_sink = None;
        }
        Ok(())
    }

    /// Must run after the new part is counted but before it is announced.
    fn check_max_parts(&self) -> Result<(), MultipartError> {
        if let Some(max) = self.config.max_files {
            if self.files_seen > max {
                return Err(MultipartError::TooManyFiles {
                    count: self.files_seen,
                    max,
                });
            }
        }
        if let Some(max) = self.config.max_fields {
            if self.fields_seen > max {
                return Err(MultipartError::TooManyFields {
                    count: self.fields_seen,
                    max,
                });
            }
        }
        Ok(())
    }
}
