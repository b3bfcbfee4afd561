//! Streaming function logs into a dev session pane.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use xt_session::{DevProcess, ProcessContext, ProcessKind};

use crate::client::ApiClient;

/// Pane label of the function log stream.
pub const FUNCTION_LOGS: &str = "function-logs";

#[derive(Debug, Deserialize)]
struct FunctionLogEntry {
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    function: Option<String>,
    #[serde(default)]
    status: Option<String>,
    line: String,
}

impl FunctionLogEntry {
    fn is_error(&self) -> bool {
        self.status.as_deref() == Some("error")
    }

    fn render(&self) -> String {
        let prefix: Vec<&str> = [self.ts.as_deref(), self.function.as_deref()]
            .into_iter()
            .flatten()
            .collect();
        if prefix.is_empty() {
            self.line.clone()
        } else {
            format!("{} {}", prefix.join(" "), self.line)
        }
    }
}

/// Tails the app's function logs once started.
///
/// Nothing is requested until the returned sender fires, and a stream that
/// fails ends this process without failing the session.
pub struct FunctionLogStream {
    client: ApiClient,
    app_id: String,
    start: oneshot::Receiver<()>,
}

impl FunctionLogStream {
    pub fn new(client: ApiClient, app_id: impl Into<String>) -> (Self, oneshot::Sender<()>) {
        let (tx, rx) = oneshot::channel();
        let stream = Self {
            client,
            app_id: app_id.into(),
            start: rx,
        };
        (stream, tx)
    }
}

#[async_trait]
impl DevProcess for FunctionLogStream {
    fn label(&self) -> &str {
        FUNCTION_LOGS
    }

    fn kind(&self) -> ProcessKind {
        ProcessKind::LogStream
    }

    async fn run(self: Box<Self>, mut ctx: ProcessContext) -> Result<()> {
        let this = *self;

        tokio::select! {
            biased;
            _ = ctx.cancelled() => return Ok(()),
            started = this.start => {
                if started.is_err() {
                    return Ok(());
                }
            }
        }

        let path = format!("/v1/apps/{}/logs/stream", this.app_id);
        let mut response = match this.client.get_stream(&path).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Failed to open function log stream");
                ctx.stderr.line(format!("Function logs unavailable: {e}"));
                return Ok(());
            }
        };
        ctx.stdout.line("Streaming function logs");

        let mut buffer = String::new();
        loop {
            let chunk = tokio::select! {
                biased;
                _ = ctx.cancelled() => break,
                chunk = response.chunk() => chunk,
            };

            let chunk = match chunk {
                Ok(Some(chunk)) => chunk,
                Ok(None) => {
                    debug!("Function log stream ended");
                    break;
                }
                Err(e) => {
                    ctx.stderr.line(format!("Function log stream failed: {e}"));
                    break;
                }
            };

            for line in split_lines(&mut buffer, &chunk) {
                match serde_json::from_str::<FunctionLogEntry>(&line) {
                    Ok(entry) if entry.is_error() => ctx.stderr.line(entry.render()),
                    Ok(entry) => ctx.stdout.line(entry.render()),
                    Err(_) => ctx.stdout.line(line),
                }
            }
        }

        Ok(())
    }
}

/// Append `chunk` and take every complete, non-empty line.
fn split_lines(buffer: &mut String, chunk: &[u8]) -> Vec<String> {
    buffer.push_str(&String::from_utf8_lossy(chunk).replace("\r\n", "\n"));

    let mut lines = Vec::new();
    while let Some(delim) = buffer.find('\n') {
        let line = buffer[..delim].trim().to_string();
        buffer.drain(..delim + 1);

        if !line.is_empty() {
            lines.push(line);
        }
    }
    lines
}
