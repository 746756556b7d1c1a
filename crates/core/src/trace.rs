//! Optional per-request trace files: a redacted copy of the inbound request and the
//! final response, written for offline debugging. Disabled when no trace directory is
//! configured. Writes happen on a dedicated task, same rationale as `request_log`.

use std::path::PathBuf;

use serde::Serialize;
use serde_json::Value;
use tokio::{fs, io::AsyncWriteExt};

const REDACTED: &str = "[redacted]";
const SENSITIVE_HEADERS: &[&str] = &["authorization", "x-api-key"];

#[derive(Debug, Serialize)]
struct TraceRecord<'a> {
    request_id: &'a str,
    request: &'a Value,
    response: &'a Value,
}

#[derive(Clone)]
pub struct TraceSink {
    dir: Option<PathBuf>,
}

impl TraceSink {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    pub fn is_enabled(&self) -> bool {
        self.dir.is_some()
    }

    pub fn write(&self, request_id: &str, mut request: Value, response: Value) {
        let Some(dir) = self.dir.clone() else {
            return;
        };

        redact_headers(&mut request);
        let record = TraceRecord {
            request_id,
            request: &request,
            response: &response,
        };
        let Ok(bytes) = serde_json::to_vec_pretty(&record) else {
            return;
        };
        let path = dir.join(format!("{request_id}.json"));

        tokio::spawn(async move {
            if let Err(e) = fs::create_dir_all(&dir).await {
                log::warn!(error:% = e; "failed to create trace directory");
                return;
            }
            match fs::File::create(&path).await {
                Ok(mut file) => {
                    if let Err(e) = file.write_all(&bytes).await {
                        log::warn!(error:% = e; "failed to write trace file");
                    }
                }
                Err(e) => log::warn!(error:% = e; "failed to create trace file"),
            }
        });
    }
}

fn redact_headers(request: &mut Value) {
    let Some(headers) = request.get_mut("headers").and_then(Value::as_object_mut) else {
        return;
    };
    for name in SENSITIVE_HEADERS {
        if let Some(value) = headers.get_mut(*name) {
            *value = Value::String(REDACTED.to_owned());
        }
    }
}
