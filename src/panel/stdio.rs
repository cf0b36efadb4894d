//! JSON-lines transport between the session and a panel driver.
//!
//! - Inbound: one [`Inbound`] JSON object per line on the reader
//! - Outbound: one [`Outbound`] JSON object per line on the writer
//!
//! Outbound events are queued on a channel and written by a single task so
//! posting never blocks the session.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use super::protocol::{Inbound, Outbound};
use super::session::{AssistantSession, PanelSink};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to read panel input: {reason}")]
    Read { reason: String },

    #[error("failed to write panel output: {reason}")]
    Write { reason: String },
}

// ─── Outbound ───────────────────────────────────────────────────────────────

/// [`PanelSink`] that queues events for [`write_events`].
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl PanelSink for ChannelSink {
    fn post(&self, event: Outbound) {
        if self.tx.send(event).is_err() {
            tracing::debug!("panel writer gone, event dropped");
        }
    }
}

/// Write queued events as JSON lines until every sender is dropped.
pub async fn write_events<W>(
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    mut writer: W,
) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(event) = rx.recv().await {
        let mut json = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize panel event");
                continue;
            }
        };
        json.push('\n');

        writer
            .write_all(json.as_bytes())
            .await
            .map_err(|e| TransportError::Write {
                reason: e.to_string(),
            })?;
        writer.flush().await.map_err(|e| TransportError::Write {
            reason: e.to_string(),
        })?;
    }
    Ok(())
}

// ─── Inbound ────────────────────────────────────────────────────────────────

/// Parse one input line. Blank and malformed lines yield `None`.
pub fn decode_line(line: &str) -> Option<Inbound> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<Inbound>(trimmed) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!(error = %e, preview = %preview(trimmed), "ignoring malformed panel event");
            None
        }
    }
}

/// Feed inbound events to `session` until the reader hits EOF, then shut
/// the session down and wait for its running tasks.
pub async fn serve<R>(session: Arc<AssistantSession>, reader: R) -> Result<(), TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line_buf = String::new();
    let mut tasks = Vec::new();

    let result = loop {
        line_buf.clear();
        let bytes_read = match reader.read_line(&mut line_buf).await {
            Ok(n) => n,
            Err(e) => {
                break Err(TransportError::Read {
                    reason: e.to_string(),
                })
            }
        };
        if bytes_read == 0 {
            tracing::info!("panel input closed");
            break Ok(());
        }

        if let Some(event) = decode_line(&line_buf) {
            if let Some(handle) = session.dispatch(event) {
                tasks.push(handle);
            }
        }
        tasks.retain(|t| !t.is_finished());
    };

    session.shutdown();
    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "session task panicked");
        }
    }
    result
}

fn preview(line: &str) -> &str {
    match line.char_indices().nth(100) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::testing::{fenced, fixture};
    use crate::panel::protocol::NoticeLevel;

    #[test]
    fn test_decode_line() {
        assert_eq!(
            decode_line("{\"type\":\"toggleLanguage\"}\n"),
            Some(Inbound::ToggleLanguage)
        );
        assert_eq!(decode_line("   \n"), None);
        assert_eq!(decode_line("not json"), None);
        assert_eq!(decode_line("{\"type\":\"bogus\"}"), None);
    }

    #[tokio::test]
    async fn test_write_events_as_lines() {
        let (sink, rx) = ChannelSink::new();
        sink.post(Outbound::SetLoading { is_loading: true });
        sink.post(Outbound::notice(NoticeLevel::Info, "done"));
        drop(sink);

        let mut out = Vec::new();
        write_events(rx, &mut out).await.unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], r#"{"type":"setLoading","isLoading":true}"#);
        assert!(lines[1].contains(r#""level":"info""#));
    }

    #[tokio::test]
    async fn test_eof_cancels_running_query() {
        let f = fixture(vec![None]);
        let input = "{\"type\":\"sendQuery\",\"value\":\"slow\"}\n";

        // Returns only once the hanging query has been cancelled
        serve(f.session.clone(), input.as_bytes()).await.unwrap();
        assert!(matches!(
            f.sink.take().last(),
            Some(Outbound::SetLoading { is_loading: false })
        ));
    }

    #[tokio::test]
    async fn test_serve_runs_queries_to_completion() {
        let f = fixture(vec![fenced(
            r#"{"actions":[{"type":"write","data":{"path":"out.txt","content":"ok"}},{"type":"stop"}]}"#,
        )]);
        let (mut client, server) = tokio::io::duplex(4096);
        let serving = tokio::spawn(serve(f.session.clone(), server));

        client
            .write_all(b"garbage line\n\n{\"type\":\"sendQuery\",\"value\":\"write it\"}\n")
            .await
            .unwrap();
        f.sink
            .wait_for(|e| matches!(e, Outbound::SetLoading { is_loading: false }).then_some(()))
            .await;
        drop(client);
        serving.await.unwrap().unwrap();

        assert_eq!(
            std::fs::read_to_string(f.dir.path().join("out.txt")).unwrap(),
            "ok"
        );
        let texts = crate::panel::testing::RecordingSink::assistant_texts(&f.sink.take());
        assert_eq!(texts.last().map(String::as_str), Some("✅ Task completed."));
    }
}
