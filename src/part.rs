//! Part model: fields, file uploads and their byte sinks.
//!
//! A [`Part`] is one discrete unit of a multipart body. The demultiplexer
//! feeds body bytes into the part's [`PartBody`] incrementally while the
//! consumer drains it, so neither side ever holds the whole body unless the
//! consumer asks for it with [`PartBody::contents`].

use std::io::Write;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio::sync::mpsc;

use crate::error::MultipartError;

/// The byte sink of a single part.
///
/// Backed by a bounded channel: when the consumer stops draining, the
/// demultiplexer's writes suspend, which in turn stops it polling the
/// upstream source. Dropping a `PartBody` discards the rest of that part's
/// bytes without blocking the demultiplexer.
#[derive(Debug)]
pub struct PartBody {
    receiver: mpsc::Receiver<Bytes>,
}

impl PartBody {
    pub(crate) fn new(receiver: mpsc::Receiver<Bytes>) -> Self {
        Self { receiver }
    }

    /// Receive the next chunk of body bytes.
    ///
    /// Returns `None` once the part has been fully delivered and closed.
    pub async fn chunk(&mut self) -> Option<Bytes> {
        self.receiver.recv().await
    }

    /// Drain the whole body into one contiguous buffer.
    ///
    /// Resolves only after the demultiplexer has closed this part's sink.
    /// This exhausts the sink: a second call returns an empty buffer.
    pub async fn contents(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = self.receiver.recv().await {
            out.extend_from_slice(&chunk);
        }
        out
    }
}

impl Stream for PartBody {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// A regular form field.
#[derive(Debug)]
pub struct Field {
    name: Option<String>,
    content_type: Option<String>,
    body: PartBody,
}

impl Field {
    pub(crate) fn new(
        name: Option<&str>,
        content_type: Option<&str>,
        body: PartBody,
    ) -> Self {
        Self {
            name: normalize(name),
            content_type: normalize(content_type),
            body,
        }
    }

    /// The field name, if the part declared one.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The declared content type, if any.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Mutable access to the byte sink, for chunk-at-a-time consumption.
    pub fn body(&mut self) -> &mut PartBody {
        &mut self.body
    }

    /// Drain the whole field value. See [`PartBody::contents`].
    pub async fn contents(&mut self) -> Vec<u8> {
        self.body.contents().await
    }
}

/// A file upload.
#[derive(Debug)]
pub struct File {
    name: Option<String>,
    content_type: Option<String>,
    filename: Option<String>,
    body: PartBody,
}

impl File {
    pub(crate) fn new(
        name: Option<&str>,
        content_type: Option<&str>,
        filename: Option<&str>,
        body: PartBody,
    ) -> Self {
        Self {
            name: normalize(name),
            content_type: normalize(content_type),
            filename: normalize(filename),
            body,
        }
    }

    /// The field name, if the part declared one.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The declared content type, if any.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// The original filename, if the part declared one.
    #[must_use]
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// Mutable access to the byte sink, for chunk-at-a-time consumption.
    pub fn body(&mut self) -> &mut PartBody {
        &mut self.body
    }

    /// Drain the whole file contents. See [`PartBody::contents`].
    pub async fn contents(&mut self) -> Vec<u8> {
        self.body.contents().await
    }

    /// Drain this file's bytes into `<dir>/<filename>`.
    ///
    /// Fails if the part has no filename or `dir` is not an existing
    /// directory. Returns the number of bytes written. Like
    /// [`PartBody::contents`], this exhausts the sink.
    pub async fn save_to(&mut self, dir: impl AsRef<Path>) -> Result<u64, MultipartError> {
        let filename = self.filename.clone().ok_or(MultipartError::MissingFilename)?;
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(MultipartError::NotADirectory {
                path: dir.display().to_string(),
            });
        }

        let path = dir.join(filename);
        let mut out = std::fs::File::create(&path).map_err(|err| MultipartError::Io {
            detail: format!("failed to create {}: {err}", path.display()),
        })?;

        let mut written = 0u64;
        while let Some(chunk) = self.body.chunk().await {
            out.write_all(&chunk).map_err(|err| MultipartError::Io {
                detail: format!("failed to write {}: {err}", path.display()),
            })?;
            written += chunk.len() as u64;
        }
        Ok(written)
    }
}

/// One discrete unit of a multipart body.
///
/// Consumers switch exhaustively on the two variants; [`Part::is_file`] is
/// kept as a convenience for code that only needs the classification.
#[derive(Debug)]
pub enum Part {
    /// A regular form field.
    Field(Field),
    /// A file upload.
    File(File),
}

impl Part {
    /// The field name, if the part declared one.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Field(field) => field.name(),
            Self::File(file) => file.name(),
        }
    }

    /// The declared content type, if any.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        match self {
            Self::Field(field) => field.content_type(),
            Self::File(file) => file.content_type(),
        }
    }

    /// The filename, for file parts that declared one.
    #[must_use]
    pub fn filename(&self) -> Option<&str> {
        match self {
            Self::Field(_) => None,
            Self::File(file) => file.filename(),
        }
    }

    /// True iff this part is a file upload.
    #[must_use]
    pub fn is_file(&self) -> bool {
        matches!(self, Self::File(_))
    }

    /// Mutable access to the byte sink, for chunk-at-a-time consumption.
    pub fn body(&mut self) -> &mut PartBody {
        match self {
            Self::Field(field) => field.body(),
            Self::File(file) => file.body(),
        }
    }

    /// Drain the whole body. See [`PartBody::contents`].
    pub async fn contents(&mut self) -> Vec<u8> {
        self.body().contents().await
    }

    /// Unwrap the file variant, discarding a field.
    #[must_use]
    pub fn into_file(self) -> Option<File> {
        match self {
            Self::File(file) => Some(file),
            Self::Field(_) => None,
        }
    }

    /// Unwrap the field variant, discarding a file.
    #[must_use]
    pub fn into_field(self) -> Option<Field> {
        match self {
            Self::Field(field) => Some(field),
            Self::File(_) => None,
        }
    }
}

/// An empty string is not a meaningful identity.
fn normalize(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}
