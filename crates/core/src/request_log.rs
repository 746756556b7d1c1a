//! Append-only JSON-Lines request log. Writes are handed to a dedicated task over a
//! bounded channel so a slow or stalled filesystem never sits on a request's
//! critical path; a full channel simply drops the entry (log-sink errors never fail a
//! request).

use std::path::PathBuf;

use serde::Serialize;
use tokio::{
    fs::OpenOptions,
    io::AsyncWriteExt,
    sync::mpsc::{self, Sender},
};

#[derive(Debug, Clone, Serialize)]
pub struct RequestLogEntry {
    pub timestamp: String,
    pub system_bytes: usize,
    pub tool_count: usize,
    pub message_count: usize,
    pub streaming: bool,
    pub backend_id: String,
    pub model: String,
    pub duration_ms: u64,
    pub outcome: &'static str,
}

pub struct RequestLogSink {
    sender: Option<Sender<RequestLogEntry>>,
}

impl RequestLogSink {
    /// `path: None` disables the sink entirely; `log()` then becomes a no-op.
    pub fn spawn(path: Option<PathBuf>) -> Self {
        let Some(path) = path else {
            return Self { sender: None };
        };

        let (sender, mut receiver) = mpsc::channel::<RequestLogEntry>(1024);

        tokio::spawn(async move {
            let file = OpenOptions::new().create(true).append(true).open(&path).await;
            let mut file = match file {
                Ok(file) => file,
                Err(e) => {
                    log::error!(path:? = path, error:% = e; "failed to open request log file");
                    return;
                }
            };

            while let Some(entry) = receiver.recv().await {
                let Ok(mut line) = serde_json::to_vec(&entry) else {
                    continue;
                };
                line.push(b'\n');
                if let Err(e) = file.write_all(&line).await {
                    log::warn!(error:% = e; "failed to write request log entry");
                }
            }
        });

        Self { sender: Some(sender) }
    }

    pub fn log(&self, entry: RequestLogEntry) {
        if let Some(sender) = &self.sender {
            let _ = sender.try_send(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_sink_accepts_entries_without_panicking() {
        let sink = RequestLogSink::spawn(None);
        sink.log(RequestLogEntry {
            timestamp: "2026-01-01T00:00:00Z".to_owned(),
            system_bytes: 0,
            tool_count: 0,
            message_count: 1,
            streaming: false,
            backend_id: "local".to_owned(),
            model: "m".to_owned(),
            duration_ms: 5,
            outcome: "ok",
        });
    }

    #[tokio::test]
    async fn writes_jsonl_entries_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requests.jsonl");
        let sink = RequestLogSink::spawn(Some(path.clone()));

        sink.log(RequestLogEntry {
            timestamp: "2026-01-01T00:00:00Z".to_owned(),
            system_bytes: 12,
            tool_count: 1,
            message_count: 2,
            streaming: true,
            backend_id: "local".to_owned(),
            model: "m".to_owned(),
            duration_ms: 42,
            outcome: "ok",
        });

        // Give the background task a chance to flush.
        for _ in 0..50 {
            if path.exists() && tokio::fs::metadata(&path).await.map(|m| m.len() > 0).unwrap_or(false) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(contents.contains("\"outcome\":\"ok\""));
        assert!(contents.contains("\"duration_ms\":42"));
    }
}
