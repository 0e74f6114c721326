//! Shared fixtures for the integration suites.

use std::io;

use bytes::Bytes;
use futures::Stream;

/// Matches what browsers actually send.
pub const BOUNDARY: &str = "----WebKitFormBoundaryyBxsRq8ZuE1dSHlY";

#[must_use]
pub fn content_type() -> String {
    format!("multipart/form-data; boundary={BOUNDARY}")
}

/// Deliver `body` as fixed-size chunks, the way a transport would.
pub fn chunked(body: &[u8], size: usize) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    let chunks: Vec<io::Result<Bytes>> = body
        .chunks(size.max(1))
        .map(Bytes::copy_from_slice)
        .map(Ok)
        .collect();
    futures::stream::iter(chunks)
}

#[must_use]
pub fn field_part(boundary: &str, name: &str, value: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(
        format!("--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n")
            .as_bytes(),
    );
    out.extend_from_slice(value);
    out.extend_from_slice(b"\r\n");
    out
}

#[must_use]
pub fn file_part(
    boundary: &str,
    name: &str,
    filename: &str,
    content_type: &str,
    data: &[u8],
) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"; \
             filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    out
}

#[must_use]
pub fn terminated(boundary: &str, parts: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    for part in parts {
        out.extend_from_slice(part);
    }
    out.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    out
}

/// One small file upload.
#[must_use]
pub fn small_request() -> Vec<u8> {
    terminated(
        BOUNDARY,
        &[file_part(
            BOUNDARY,
            "upload",
            "small.txt",
            "text/plain",
            b"hello world",
        )],
    )
}

/// Two fields and two files, interleaved.
#[must_use]
pub fn multi_request() -> Vec<u8> {
    terminated(
        BOUNDARY,
        &[
            field_part(BOUNDARY, "test_text1", &[b'x'; 300]),
            file_part(BOUNDARY, "upload1", "small.txt", "text/plain", &[b'a'; 1500]),
            field_part(BOUNDARY, "test_text2", &[b'y'; 40]),
            file_part(
                BOUNDARY,
                "upload2",
                "other.bin",
                "application/octet-stream",
                &[b'b'; 600],
            ),
        ],
    )
}
