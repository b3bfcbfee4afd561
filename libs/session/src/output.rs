//! Output multiplexing.
//!
//! Tasks never write to the real stdout or stderr. Each one gets a pair of
//! [`OutputSink`]s that append to its own pane. Chunks are split into lines;
//! an unterminated tail stays pending until the next chunk completes it. Each
//! pane keeps a bounded number of lines, and a renderer reads consistent
//! [`PaneSnapshot`]s of all panes at once.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::watch;

/// Which of a task's sinks a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    Stdout,
    Stderr,
}

/// One complete line of task output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputLine {
    pub stream: Stream,
    pub text: String,
}

/// Point-in-time copy of one pane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaneSnapshot {
    pub label: String,

    /// Buffered lines, oldest first.
    pub lines: Vec<OutputLine>,

    /// Lines dropped because the pane was full.
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct Pane {
    lines: VecDeque<OutputLine>,
    pending_stdout: String,
    pending_stderr: String,
    dropped: u64,
}

impl Pane {
    fn pending(&mut self, stream: Stream) -> &mut String {
        match stream {
            Stream::Stdout => &mut self.pending_stdout,
            Stream::Stderr => &mut self.pending_stderr,
        }
    }

    fn push_line(&mut self, stream: Stream, text: String, capacity: usize) {
        if self.lines.len() == capacity {
            self.lines.pop_front();
            self.dropped += 1;
        }
        self.lines.push_back(OutputLine { stream, text });
    }

    fn append(&mut self, stream: Stream, chunk: &str, capacity: usize) -> bool {
        let mut completed = Vec::new();
        {
            let pending = self.pending(stream);
            pending.push_str(chunk);
            while let Some(pos) = pending.find('\n') {
                let mut line: String = pending.drain(..=pos).collect();
                line.pop();
                if line.ends_with('\r') {
                    line.pop();
                }
                completed.push(line);
            }
        }
        let any = !completed.is_empty();
        for line in completed {
            self.push_line(stream, line, capacity);
        }
        any
    }

    fn flush(&mut self, stream: Stream, capacity: usize) -> bool {
        let rest = std::mem::take(self.pending(stream));
        if rest.is_empty() {
            return false;
        }
        self.push_line(stream, rest, capacity);
        true
    }
}

#[derive(Debug, Default)]
struct Panes {
    /// Pane labels in registration order.
    order: Vec<String>,
    panes: BTreeMap<String, Pane>,
}

#[derive(Debug)]
struct Shared {
    panes: Mutex<Panes>,
    capacity: usize,
    version: watch::Sender<u64>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Panes> {
        self.panes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v += 1);
    }
}

/// Owner of every task pane.
#[derive(Debug, Clone)]
pub struct OutputMultiplexer {
    shared: Arc<Shared>,
}

impl OutputMultiplexer {
    /// Create a multiplexer keeping at most `capacity` lines per pane.
    pub fn new(capacity: usize) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                panes: Mutex::new(Panes::default()),
                capacity: capacity.max(1),
                version,
            }),
        }
    }

    /// Get stdout and stderr sinks for a pane, creating the pane if needed.
    pub fn sinks(&self, label: &str) -> (OutputSink, OutputSink) {
        {
            let mut panes = self.shared.lock();
            if !panes.panes.contains_key(label) {
                panes.order.push(label.to_string());
                panes.panes.insert(label.to_string(), Pane::default());
            }
        }

        let sink = |stream| OutputSink {
            label: label.to_string(),
            stream,
            shared: self.shared.clone(),
        };
        (sink(Stream::Stdout), sink(Stream::Stderr))
    }

    /// Copy every pane, in registration order.
    pub fn snapshot(&self) -> Vec<PaneSnapshot> {
        let panes = self.shared.lock();
        panes
            .order
            .iter()
            .filter_map(|label| {
                panes.panes.get(label).map(|pane| PaneSnapshot {
                    label: label.clone(),
                    lines: pane.lines.iter().cloned().collect(),
                    dropped: pane.dropped,
                })
            })
            .collect()
    }

    /// Copy one pane.
    pub fn pane(&self, label: &str) -> Option<PaneSnapshot> {
        let panes = self.shared.lock();
        panes.panes.get(label).map(|pane| PaneSnapshot {
            label: label.to_string(),
            lines: pane.lines.iter().cloned().collect(),
            dropped: pane.dropped,
        })
    }

    /// Receiver that changes whenever a line is added to any pane.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.shared.version.subscribe()
    }
}

/// Write end of one pane stream.
#[derive(Debug, Clone)]
pub struct OutputSink {
    label: String,
    stream: Stream,
    shared: Arc<Shared>,
}

impl OutputSink {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn stream(&self) -> Stream {
        self.stream
    }

    /// Append a raw chunk.
    pub fn write(&self, chunk: &str) {
        let added = {
            let mut panes = self.shared.lock();
            match panes.panes.get_mut(&self.label) {
                Some(pane) => pane.append(self.stream, chunk, self.shared.capacity),
                None => false,
            }
        };
        if added {
            self.shared.bump();
        }
    }

    /// Append a complete line.
    pub fn line(&self, text: impl AsRef<str>) {
        let mut chunk = text.as_ref().to_string();
        chunk.push('\n');
        self.write(&chunk);
    }

    /// Move any unterminated tail into the pane as a line of its own.
    pub fn flush(&self) {
        let added = {
            let mut panes = self.shared.lock();
            match panes.panes.get_mut(&self.label) {
                Some(pane) => pane.flush(self.stream, self.shared.capacity),
                None => false,
            }
        };
        if added {
            self.shared.bump();
        }
    }
}
