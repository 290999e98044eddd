//! Topic streams read from JSON Lines.
//!
//! One topic object per line:
//!
//! ```text
//! {"title":"Install Guide","content":"Download the installer.","source_url":"https://docs.example.com/install"}
//! ```

use std::borrow::Cow;
use std::path::Path;
use std::pin::Pin;

use async_stream::stream;
use futures::Stream;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{error, warn};

use crate::error::{ConsolidationError, Result};
use crate::types::topic::Topic;

/// A boxed topic stream. An `Err` item means the input itself failed.
pub type TopicStream = Pin<Box<dyn Stream<Item = Result<Topic>> + Send>>;

/// Parse one line. Blank lines and `#` comments yield `None`.
pub fn parse_topic_line(line: &str) -> Result<Option<Topic>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(line)?))
}

/// Stream topics from a buffered reader.
///
/// Lines are decoded lossily, so invalid UTF-8 never ends the stream.
/// Lines that are not a topic object are logged and skipped. A read error
/// is yielded once and ends the stream.
pub fn topics_from_reader<R>(mut reader: R) -> TopicStream
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    Box::pin(stream! {
        let mut buf = Vec::new();
        let mut line_no = 0usize;
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    error!(line = line_no + 1, error = %e, "Failed to read topic stream");
                    yield Err(ConsolidationError::from(e));
                    break;
                }
            }
            line_no += 1;

            let line = String::from_utf8_lossy(&buf);
            if matches!(line, Cow::Owned(_)) {
                warn!(line = line_no, "Invalid UTF-8 in topic line, replaced");
            }

            match parse_topic_line(&line) {
                Ok(Some(topic)) => yield Ok(topic),
                Ok(None) => {}
                Err(e) => warn!(line = line_no, error = %e, "Skipping malformed topic"),
            }
        }
    })
}

/// Open a JSON Lines file as a topic stream.
pub async fn open_topics(path: impl AsRef<Path>) -> Result<TopicStream> {
    let file = tokio::fs::File::open(path.as_ref()).await?;
    Ok(topics_from_reader(BufReader::new(file)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_parse_topic_line() {
        assert!(parse_topic_line("   ").unwrap().is_none());
        assert!(parse_topic_line("# comment").unwrap().is_none());
        assert!(parse_topic_line("{not json").is_err());

        let t = parse_topic_line(r#"{"title":"T","content":"C","source_url":"https://x.dev","category":"faq"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(t.category.as_deref(), Some("faq"));
    }

    #[tokio::test]
    async fn test_stream_skips_malformed_lines() {
        let input = concat!(
            r#"{"title":"A","content":"a","source_url":"https://x.dev/a"}"#,
            "\n\nnot json\n",
            r#"{"title":"B","content":"b","source_url":"https://x.dev/b"}"#,
            "\n"
        );
        let topics: Vec<Topic> = topics_from_reader(BufReader::new(input.as_bytes()))
            .map(|t| t.unwrap())
            .collect()
            .await;
        let titles: Vec<&str> = topics.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_does_not_end_stream() {
        let mut input = Vec::new();
        input.extend_from_slice(br#"{"title":"A","content":"a","source_url":"https://x.dev/a"}"#);
        input.extend_from_slice(b"\n\xff\xfe garbage\n");
        input.extend_from_slice(br#"{"title":"B","content":"caf"#);
        input.extend_from_slice(b"\xe9");
        input.extend_from_slice(br#"","source_url":"https://x.dev/b"}"#);
        input.extend_from_slice(b"\n");
        input.extend_from_slice(br#"{"title":"C","content":"c","source_url":"https://x.dev/c"}"#);

        let topics: Vec<Topic> = topics_from_reader(BufReader::new(std::io::Cursor::new(input)))
            .map(|t| t.unwrap())
            .collect()
            .await;
        let titles: Vec<&str> = topics.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "B", "C"]);
        assert_eq!(topics[1].content, "caf\u{fffd}");
    }

    #[tokio::test]
    async fn test_read_error_is_yielded() {
        let reader = tokio_test::io::Builder::new()
            .read(br#"{"title":"A","content":"a","source_url":"https://x.dev/a"}"#)
            .read(b"\n")
            .read_error(std::io::Error::new(std::io::ErrorKind::Other, "disk gone"))
            .build();

        let items: Vec<Result<Topic>> = topics_from_reader(BufReader::new(reader)).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap().title, "A");
        assert!(items[1].is_err());
    }

    #[tokio::test]
    async fn test_open_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(open_topics(dir.path().join("nope.jsonl")).await.is_err());
    }
}
