//! The same request must parse identically no matter how the transport
//! slices it into chunks.

mod common;

use partstream::Multipart;

use common::{chunked, content_type, multi_request, small_request, BOUNDARY};

#[derive(Debug, PartialEq, Eq)]
struct Observed {
    is_file: bool,
    name: Option<String>,
    filename: Option<String>,
    content: Vec<u8>,
}

async fn collect(body: &[u8], chunk_size: usize) -> Vec<Observed> {
    let mut multipart = Multipart::new(&content_type(), chunked(body, chunk_size))
        .expect("valid content type");
    let mut observed = Vec::new();
    while let Some(mut part) = multipart.next_part().await.expect("clean parse") {
        observed.push(Observed {
            is_file: part.is_file(),
            name: part.name().map(str::to_owned),
            filename: part.filename().map(str::to_owned),
            content: part.contents().await,
        });
    }
    observed
}

#[tokio::test]
async fn single_file_survives_any_chunk_size() {
    let body = small_request();
    // The end boundary is the longest marker the scanner has to see whole,
    // so sizes straddling its length are the interesting ones.
    let end_len = BOUNDARY.len() + 4;
    let sizes = [
        1,
        3,
        end_len - 1,
        end_len,
        end_len + 1,
        10,
        50,
        200,
        body.len(),
    ];

    let expected = collect(&body, body.len()).await;
    assert_eq!(expected.len(), 1);
    assert_eq!(expected[0].content, b"hello world");
    assert_eq!(expected[0].filename.as_deref(), Some("small.txt"));

    for size in sizes {
        let observed = collect(&body, size).await;
        assert_eq!(observed, expected, "chunk size {size}");
    }
}

#[tokio::test]
async fn mixed_request_survives_any_chunk_size() {
    let body = multi_request();
    let expected = collect(&body, body.len()).await;
    assert_eq!(expected.len(), 4);
    assert_eq!(expected[0].name.as_deref(), Some("test_text1"));
    assert_eq!(expected[0].content, vec![b'x'; 300]);
    assert_eq!(expected[1].filename.as_deref(), Some("small.txt"));
    assert_eq!(expected[1].content, vec![b'a'; 1500]);
    assert_eq!(expected[2].name.as_deref(), Some("test_text2"));
    assert_eq!(expected[2].content, vec![b'y'; 40]);
    assert_eq!(expected[3].filename.as_deref(), Some("other.bin"));
    assert_eq!(expected[3].content, vec![b'b'; 600]);

    for size in [1, 20, 100, 1000] {
        let observed = collect(&body, size).await;
        assert_eq!(observed, expected, "chunk size {size}");
    }
}

#[tokio::test]
async fn one_byte_chunks_with_short_boundary() {
    let body = b"--B\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nhello\r\n--B--\r\n";
    let mut multipart = Multipart::new("multipart/form-data; boundary=B", chunked(body, 1))
        .expect("valid content type");

    let mut part = multipart
        .next_part()
        .await
        .expect("clean parse")
        .expect("one part");
    assert!(!part.is_file());
    assert_eq!(part.name(), Some("a"));
    assert_eq!(part.contents().await, b"hello");

    assert!(multipart.next_part().await.expect("clean parse").is_none());
}

#[tokio::test]
async fn preamble_before_first_boundary_is_ignored() {
    let mut body = b"this prologue is not part of any part\r\n".to_vec();
    body.extend_from_slice(&small_request());

    for size in [7, body.len()] {
        let observed = collect(&body, size).await;
        assert_eq!(observed.len(), 1, "chunk size {size}");
        assert_eq!(observed[0].content, b"hello world");
    }
}
