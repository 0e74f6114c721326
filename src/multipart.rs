//! Consumption surfaces over the demultiplexer.
//!
//! Both surfaces are thin adapters over one bounded channel of announced
//! parts, so they can never replay or lose a part:
//!
//! - pull: [`Multipart::next_part`] / [`Multipart::next_file`] /
//!   [`Multipart::next_field`], plus a [`futures::Stream`] impl;
//! - push: a [`MultipartHandler`] driven by [`Multipart::drive`].

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio::sync::mpsc;

use crate::demux::{Demultiplexer, MultipartConfig, PART_CHANNEL_CAPACITY};
use crate::error::MultipartError;
use crate::part::{Field, File, Part};

/// RFC 2046 recommends multipart boundary length <= 70 characters.
const MAX_BOUNDARY_LEN: usize = 70;

/// Extract the boundary token from a Content-Type header value.
///
/// Fails if the value is empty, does not declare `multipart/form-data`, or
/// carries no usable `boundary` attribute.
///
/// # Example
///
/// ```
/// use partstream::parse_boundary;
///
/// let token = parse_boundary("multipart/form-data; boundary=simple-boundary").unwrap();
/// assert_eq!(token, "simple-boundary");
/// ```
pub fn parse_boundary(content_type: &str) -> Result<String, MultipartError> {
    let content_type = content_type.trim();
    if content_type.is_empty() {
        return Err(MultipartError::MissingContentType);
    }

    let main = content_type.split(';').next().unwrap_or("").trim();
    if !main.eq_ignore_ascii_case("multipart/form-data") {
        return Err(MultipartError::NotMultipart);
    }

    for param in content_type.split(';').skip(1) {
        let Some((key, value)) = param.trim().split_once('=') else {
            continue;
        };
        if key.trim().eq_ignore_ascii_case("boundary") {
            let token = value.trim().trim_matches('"');
            if token.is_empty() || token.len() > MAX_BOUNDARY_LEN {
                return Err(MultipartError::InvalidBoundary);
            }
            return Ok(token.to_string());
        }
    }

    Err(MultipartError::MissingBoundary)
}

/// Push-surface callbacks.
///
/// All methods have empty default bodies, so a handler implements only what
/// it cares about. For every part, `on_part` runs first with a borrow, then
/// ownership moves to the type-specific `on_file` or `on_field` — both
/// before any of that part's body bytes are delivered.
#[allow(async_fn_in_trait)]
pub trait MultipartHandler {
    /// A new part was announced. Runs before `on_file` / `on_field`.
    async fn on_part(&mut self, _part: &Part) {}

    /// A file part was announced.
    async fn on_file(&mut self, _file: File) {}

    /// A field part was announced.
    async fn on_field(&mut self, _field: Field) {}

    /// The terminal boundary was reached. Called exactly once, never after
    /// an error.
    async fn on_finished(&mut self) {}

    /// The stream failed. Called at most once; the same error is also
    /// returned from [`Multipart::drive`], so it is never swallowed.
    async fn on_error(&mut self, _error: &MultipartError) {}
}

/// A demultiplexed multipart stream.
///
/// One single-pass sequence of parts: every part is produced exactly once,
/// across whichever mix of surfaces the caller uses. A part's body must be
/// drained or dropped for the demultiplexer to make progress past the
/// bounded sink capacity.
#[derive(Debug)]
pub struct Multipart {
    receiver: mpsc::Receiver<Result<Part, MultipartError>>,
}

impl Multipart {
    /// Start demultiplexing `body` with default limits.
    ///
    /// `content_type` is the request's Content-Type header value; it must
    /// declare `multipart/form-data` with a boundary attribute, otherwise
    /// construction fails before any chunk is read. Must be called within a
    /// Tokio runtime: the demultiplexer runs as a spawned pump task.
    pub fn new<S>(content_type: &str, body: S) -> Result<Self, MultipartError>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self::with_config(content_type, body, MultipartConfig::default())
    }

    /// Start demultiplexing `body` with explicit limits.
    pub fn with_config<S>(
        content_type: &str,
        body: S,
        config: MultipartConfig,
    ) -> Result<Self, MultipartError>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        let token = parse_boundary(content_type)?;
        let (parts_tx, receiver) = mpsc::channel(PART_CHANNEL_CAPACITY);
        let demux = Demultiplexer::new(&token, config, parts_tx);
        tokio::spawn(demux.run(body));
        Ok(Self { receiver })
    }

    /// Receive the next part.
    ///
    /// `Ok(None)` means the terminal boundary was reached; a limit violation
    /// or malformed stream surfaces as `Err` exactly once, after which the
    /// sequence is over.
    pub async fn next_part(&mut self) -> Result<Option<Part>, MultipartError> {
        match self.receiver.recv().await {
            Some(Ok(part)) => Ok(Some(part)),
            Some(Err(err)) => Err(err),
            None => Ok(None),
        }
    }

    /// Receive the next file part, discarding any field parts in between.
    pub async fn next_file(&mut self) -> Result<Option<File>, MultipartError> {
        loop {
            match self.next_part().await? {
                Some(Part::File(file)) => return Ok(Some(file)),
                Some(Part::Field(_)) => {}
                None => return Ok(None),
            }
        }
    }

    /// Receive the next field part, discarding any file parts in between.
    pub async fn next_field(&mut self) -> Result<Option<Field>, MultipartError> {
        loop {
            match self.next_part().await? {
                Some(Part::Field(field)) => return Ok(Some(field)),
                Some(Part::File(_)) => {}
                None => return Ok(None),
            }
        }
    }

    /// Drive the push surface to completion.
    ///
    /// Consumes the stream, invoking the handler's callbacks per part, then
    /// `on_finished` on clean end or `on_error` on failure. The error is
    /// also returned.
    pub async fn drive<H>(mut self, handler: &mut H) -> Result<(), MultipartError>
    where
        H: MultipartHandler,
    {
        loop {
            match self.next_part().await {
                Ok(Some(part)) => {
                    handler.on_part(&part).await;
                    match part {
                        Part::File(file) => handler.on_file(file).await,
                        Part::Field(field) => handler.on_field(field).await,
                    }
                }
                Ok(None) => {
                    handler.on_finished().await;
                    return Ok(());
                }
                Err(err) => {
                    handler.on_error(&err).await;
                    return Err(err);
                }
            }
        }
    }
}

impl Stream for Multipart {
    type Item = Result<Part, MultipartError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_boundary_extracts_token() {
        let token =
            parse_boundary("multipart/form-data; boundary=----WebKitFormBoundary7MA4YWxkTrZu0gW")
                .unwrap();
        assert_eq!(token, "----WebKitFormBoundary7MA4YWxkTrZu0gW");
    }

    #[test]
    fn parse_boundary_unquotes_token() {
        let token = parse_boundary(r#"multipart/form-data; boundary="simple-boundary""#).unwrap();
        assert_eq!(token, "simple-boundary");
    }

    #[test]
    fn parse_boundary_is_case_insensitive_about_the_attribute_name() {
        let token = parse_boundary(r#"multipart/form-data; Boundary="simple-boundary""#).unwrap();
        assert_eq!(token, "simple-boundary");
    }

    #[test]
    fn parse_boundary_rejects_empty_header() {
        assert!(matches!(
            parse_boundary("  "),
            Err(MultipartError::MissingContentType)
        ));
    }

    #[test]
    fn parse_boundary_rejects_other_content_types() {
        assert!(matches!(
            parse_boundary("application/json"),
            Err(MultipartError::NotMultipart)
        ));
    }

    #[test]
    fn parse_boundary_rejects_missing_attribute() {
        assert!(matches!(
            parse_boundary("multipart/form-data"),
            Err(MultipartError::MissingBoundary)
        ));
    }

    #[test]
    fn parse_boundary_rejects_overlong_token() {
        let header = format!("multipart/form-data; boundary={}", "a".repeat(71));
        assert!(matches!(
            parse_boundary(&header),
            Err(MultipartError::InvalidBoundary)
        ));
    }
}
