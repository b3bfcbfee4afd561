//! Printing dev session panes to the terminal.

use std::collections::HashMap;

use colored::{Color, Colorize};
use tokio::sync::watch;
use xt_session::{OutputLine, OutputMultiplexer, Stream};

const LABEL_COLORS: [Color; 6] = [
    Color::Cyan,
    Color::Magenta,
    Color::Blue,
    Color::Green,
    Color::Yellow,
    Color::BrightCyan,
];

/// Interleaves every pane into one prefixed stream.
pub struct PaneRenderer {
    output: OutputMultiplexer,
    /// Lines already printed per pane, counting dropped ones.
    printed: HashMap<String, u64>,
    width: usize,
}

impl PaneRenderer {
    pub fn new(output: OutputMultiplexer) -> Self {
        Self {
            output,
            printed: HashMap::new(),
            width: 0,
        }
    }

    /// Lines added since the last call, in pane registration order.
    ///
    /// Lines a pane dropped before they could be taken are skipped.
    pub fn take_new(&mut self) -> Vec<(usize, String, OutputLine)> {
        let mut out = Vec::new();
        for (index, pane) in self.output.snapshot().into_iter().enumerate() {
            let total = pane.dropped + pane.lines.len() as u64;
            let printed = self.printed.entry(pane.label.clone()).or_default();
            let skip = printed.saturating_sub(pane.dropped) as usize;
            *printed = total;

            for line in pane.lines.into_iter().skip(skip) {
                out.push((index, pane.label.clone(), line));
            }
        }
        out
    }

    fn print_new(&mut self) {
        for (index, label, line) in self.take_new() {
            self.width = self.width.max(label.len());
            let prefix = format!("{:>width$} |", label, width = self.width)
                .color(LABEL_COLORS[index % LABEL_COLORS.len()]);
            match line.stream {
                Stream::Stdout => println!("{} {}", prefix, line.text),
                Stream::Stderr => eprintln!("{} {}", prefix, line.text.red()),
            }
        }
    }

    /// Print lines as they arrive until `shutdown` is set or the session ends.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut version = self.output.subscribe();
        loop {
            self.print_new();
            tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => break,
                changed = version.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        self.print_new();
    }
}
