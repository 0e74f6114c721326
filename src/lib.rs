//! Streaming `multipart/form-data` demultiplexing.
//!
//! This crate incrementally decodes a multipart byte stream into discrete
//! parts (form fields and file uploads) without buffering the whole request
//! body. It is correct for any chunking of the input — a boundary marker, a
//! header block or a field value may be split arbitrarily across chunks —
//! and enforces configurable resource limits so a hostile request cannot
//! grow memory or file counts without bound.
//!
//! # Features
//!
//! - Incremental boundary detection across chunk splits
//! - Pull-style consumption: [`Multipart::next_part`] and filtered
//!   [`Multipart::next_file`] / [`Multipart::next_field`] sequences
//! - Push-style consumption: [`MultipartHandler`] callbacks via
//!   [`Multipart::drive`]
//! - Backpressure through bounded channels: a saturated part sink suspends
//!   the demultiplexer, which stops polling the upstream source
//! - Limits on header-buffer, total, per-file and per-field sizes, and on
//!   file and field counts
//!
//! # Example
//!
//! ```no_run
//! use bytes::Bytes;
//! use futures::stream;
//! use partstream::Multipart;
//!
//! # async fn demo() -> Result<(), partstream::MultipartError> {
//! let body = stream::iter(vec![Ok(Bytes::from_static(
//!     b"--B\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nhello\r\n--B--\r\n",
//! ))]);
//! let mut multipart = Multipart::new("multipart/form-data; boundary=B", body)?;
//!
//! while let Some(mut part) = multipart.next_part().await? {
//!     let name = part.name().map(str::to_owned);
//!     println!("{:?}: {} bytes", name, part.contents().await.len());
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

mod demux;
mod error;
mod header;
mod multipart;
mod part;

pub use demux::{DEFAULT_MAX_BUFFER_SIZE, MultipartConfig};
pub use error::MultipartError;
pub use multipart::{Multipart, MultipartHandler, parse_boundary};
pub use part::{Field, File, Part, PartBody};
