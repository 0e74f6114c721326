//! Per-part header block parsing.
//!
//! A part's header block is the raw text between the boundary line and the
//! blank line (`CRLF CRLF`) that ends it. Fields are derived lazily from the
//! text; absence is represented with `None`, never an error.

/// The parsed header block of a single part.
///
/// Owned by the demultiplexer from the moment the header terminator is found
/// until the part is constructed; immutable thereafter.
#[derive(Debug, Clone)]
pub(crate) struct PartHeader {
    content: String,
}

impl PartHeader {
    /// Build a header from the raw bytes between the boundary line and the
    /// header terminator. Invalid UTF-8 is replaced, not rejected.
    pub(crate) fn new(raw: &[u8]) -> Self {
        Self {
            content: String::from_utf8_lossy(raw).into_owned(),
        }
    }

    /// The `name="..."` attribute of the Content-Disposition line, if any.
    pub(crate) fn name(&self) -> Option<&str> {
        quoted_param(&self.content, "name")
    }

    /// The `filename="..."` attribute, if any. Presence marks a file part.
    pub(crate) fn filename(&self) -> Option<&str> {
        quoted_param(&self.content, "filename")
    }

    /// The value of the first `Content-Type:` line, if any.
    ///
    /// Matching is case-insensitive. The value is cut at the first whitespace
    /// and stripped of a trailing `;`, so `text/plain; charset=utf-8` yields
    /// `text/plain`.
    pub(crate) fn content_type(&self) -> Option<&str> {
        const PREFIX: &str = "content-type:";
        for line in self.content.lines() {
            if line.len() >= PREFIX.len() && line[..PREFIX.len()].eq_ignore_ascii_case(PREFIX) {
                let value = line[PREFIX.len()..].trim_start();
                let value = value.split_whitespace().next().unwrap_or("");
                return Some(value.trim_end_matches(';'));
            }
        }
        None
    }

    /// True iff the header text carries a filename marker or the declared
    /// content type is `application/octet-stream`.
    pub(crate) fn is_file(&self) -> bool {
        self.content.contains("filename")
            || self.content_type() == Some("application/octet-stream")
    }
}

/// Extract the value of a `key="value"` attribute.
///
/// Rejects matches where `key` is the suffix of a longer token, so looking up
/// `name` never matches inside `filename`.
fn quoted_param<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    let marker = format!("{key}=\"");
    let mut search = 0;
    while let Some(found) = text[search..].find(&marker) {
        let at = search + found;
        let value_start = at + marker.len();
        if at == 0 || !text.as_bytes()[at - 1].is_ascii_alphanumeric() {
            let len = text[value_start..].find('"')?;
            return Some(&text[value_start..value_start + len]);
        }
        search = value_start;
    }
    None
}
