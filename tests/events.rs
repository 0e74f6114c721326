//! The push surface: `drive` must invoke handler callbacks in part order
//! and terminate with exactly one of `on_finished` or `on_error`.

mod common;

use partstream::{Field, File, Multipart, MultipartConfig, MultipartError, MultipartHandler, Part};

use common::{chunked, content_type, multi_request};

#[derive(Default)]
struct Recorder {
    events: Vec<String>,
    field_contents: Vec<(Option<String>, Vec<u8>)>,
    file_sizes: Vec<(Option<String>, usize)>,
}

impl MultipartHandler for Recorder {
    async fn on_part(&mut self, part: &Part) {
        self.events.push(format!("part:{}", part.name().unwrap_or("?")));
    }

    async fn on_file(&mut self, mut file: File) {
        let filename = file.filename().map(str::to_owned);
        let contents = file.contents().await;
        self.events.push("file".to_owned());
        self.file_sizes.push((filename, contents.len()));
    }

    async fn on_field(&mut self, mut field: Field) {
        let name = field.name().map(str::to_owned);
        let contents = field.contents().await;
        self.events.push("field".to_owned());
        self.field_contents.push((name, contents));
    }

    async fn on_finished(&mut self) {
        self.events.push("finished".to_owned());
    }

    async fn on_error(&mut self, error: &MultipartError) {
        self.events.push(format!("error:{error}"));
    }
}

#[tokio::test]
async fn handler_sees_parts_in_order_then_finished() {
    let body = multi_request();
    let multipart =
        Multipart::new(&content_type(), chunked(&body, 100)).expect("valid content type");

    let mut recorder = Recorder::default();
    multipart.drive(&mut recorder).await.expect("clean parse");

    assert_eq!(
        recorder.events,
        vec![
            "part:test_text1",
            "field",
            "part:upload1",
            "file",
            "part:test_text2",
            "field",
            "part:upload2",
            "file",
            "finished",
        ]
    );
    assert_eq!(recorder.field_contents[0].0.as_deref(), Some("test_text1"));
    assert_eq!(recorder.field_contents[0].1, vec![b'x'; 300]);
    assert_eq!(recorder.field_contents[1].1, vec![b'y'; 40]);
    assert_eq!(
        recorder.file_sizes,
        vec![
            (Some("small.txt".to_owned()), 1500),
            (Some("other.bin".to_owned()), 600),
        ]
    );
}

#[tokio::test]
async fn handler_sees_error_exactly_once() {
    let body = multi_request();
    let multipart = Multipart::with_config(
        &content_type(),
        chunked(&body, 100),
        MultipartConfig::new().max_files(1),
    )
    .expect("valid content type");

    let mut recorder = Recorder::default();
    let err = multipart
        .drive(&mut recorder)
        .await
        .expect_err("second file exceeds the limit");
    assert!(matches!(err, MultipartError::TooManyFiles { count: 2, max: 1 }));

    let errors: Vec<_> = recorder
        .events
        .iter()
        .filter(|event| event.starts_with("error:"))
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(!recorder.events.iter().any(|event| event == "finished"));
}

#[tokio::test]
async fn default_handler_methods_are_no_ops() {
    struct Quiet;
    impl MultipartHandler for Quiet {}

    let body = multi_request();
    let multipart =
        Multipart::new(&content_type(), chunked(&body, 50)).expect("valid content type");
    // Parts are dropped unread; the pump must still reach the terminal
    // boundary without blocking.
    multipart.drive(&mut Quiet).await.expect("clean parse");
}
