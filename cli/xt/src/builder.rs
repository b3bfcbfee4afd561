//! Building extensions with their manifest's `[build]` command.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use notify_debouncer_mini::notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, DebouncedEventKind};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};
use xt_session::{BuildArtifact, BuildError, BuildExecutor, BuildMode, Extension, WatchEvent};

use crate::project::load_extension;

/// Lines of build stderr kept in a failure message.
const FAILURE_TAIL_LINES: usize = 20;

/// `[build]` section of an extension manifest.
#[derive(Debug, Default, Deserialize)]
struct BuildSettings {
    /// Shell command run in the extension directory.
    #[serde(default)]
    command: Option<String>,

    /// Directory the command writes to, relative to the extension.
    #[serde(default)]
    output: Option<PathBuf>,

    /// Directories watched for changes, relative to the extension. Defaults
    /// to the whole extension directory.
    #[serde(default)]
    watch: Vec<PathBuf>,
}

impl BuildSettings {
    fn of(extension: &Extension) -> Result<Self, BuildError> {
        match extension.configuration.get("build") {
            None => Ok(Self::default()),
            Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
                BuildError::NotBuildable(format!("invalid [build] section: {e}"))
            }),
        }
    }

    fn output_dir(&self, extension: &Extension) -> PathBuf {
        match &self.output {
            Some(output) => extension.directory.join(output),
            None => extension.directory.clone(),
        }
    }

    fn watch_dirs(&self, extension: &Extension) -> Vec<PathBuf> {
        if self.watch.is_empty() {
            vec![extension.directory.clone()]
        } else {
            self.watch.iter().map(|dir| extension.directory.join(dir)).collect()
        }
    }
}

/// Runs build commands with `sh -c` and rebuilds on debounced file events.
#[derive(Debug, Clone, Copy)]
pub struct CommandBuilder {
    debounce: Duration,
}

impl Default for CommandBuilder {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
        }
    }
}

impl CommandBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Quiet period after a file event before a rebuild starts.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }
    /// Rebuild once and report it. Returns false once nobody is listening.
    async fn rebuild(
        &self,
        extension: &mut Extension,
        tx: &mpsc::UnboundedSender<WatchEvent>,
    ) -> bool {
        if tx.send(WatchEvent::Building).is_err() {
            return false;
        }
        reload_configuration(extension).await;
        let event = match self.build(extension, BuildMode::Development).await {
            Ok(artifact) => WatchEvent::Rebuilt(artifact),
            Err(e) => WatchEvent::BuildFailed(e.to_string()),
        };
        tx.send(event).is_ok()
    }
}

#[async_trait]
impl BuildExecutor for CommandBuilder {
    async fn build(
        &self,
        extension: &Extension,
        mode: BuildMode,
    ) -> Result<BuildArtifact, BuildError> {
        let settings = BuildSettings::of(extension)?;

        if let Some(command) = &settings.command {
            debug!(extension = %extension.handle, command = %command, "Running build command");
            let output = Command::new("sh")
                .arg("-c")
                .arg(command)
                .current_dir(&extension.directory)
                .env("XT_BUILD_MODE", mode_name(mode))
                .kill_on_drop(true)
                .output()
                .await?;

            if !output.status.success() {
                return Err(BuildError::Failed(failure_message(&output)));
            }
        }

        let dir = settings.output_dir(extension);
        let (reference, size) = tokio::task::spawn_blocking(move || digest_dir(&dir))
            .await
            .map_err(|e| BuildError::Failed(e.to_string()))??;

        info!(extension = %extension.handle, artifact = %reference, size, "Built extension");
        Ok(BuildArtifact { reference, size })
    }

    async fn watch(
        &self,
        extension: &Extension,
    ) -> Result<mpsc::UnboundedReceiver<WatchEvent>, BuildError> {
        let settings = BuildSettings::of(extension)?;
        let filter = SourceFilter {
            root: extension.directory.clone(),
            output: settings.output.as_ref().map(|_| settings.output_dir(extension)),
        };

        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<Vec<PathBuf>>();
        let handle = extension.handle.clone();
        let mut debouncer = new_debouncer(self.debounce, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    let paths = events
                        .into_iter()
                        .filter(|e| e.kind == DebouncedEventKind::Any)
                        .map(|e| e.path)
                        .collect::<Vec<_>>();
                    if !paths.is_empty() {
                        let _ = raw_tx.send(paths);
                    }
                }
                Err(e) => warn!(extension = %handle, error = %e, "File watch error"),
            }
        })
        .map_err(io::Error::other)?;

        for dir in settings.watch_dirs(extension) {
            debouncer
                .watcher()
                .watch(&dir, RecursiveMode::Recursive)
                .map_err(|e| io::Error::other(format!("cannot watch {}: {e}", dir.display())))?;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let builder = *self;
        let mut extension = extension.clone();

        tokio::spawn(async move {
            // Dropping the debouncer stops its watcher thread.
            let _debouncer = debouncer;

            'watch: loop {
                let paths = tokio::select! {
                    _ = tx.closed() => break 'watch,
                    paths = raw_rx.recv() => match paths {
                        Some(paths) => paths,
                        None => break 'watch,
                    },
                };
                if !paths.iter().any(|path| filter.is_source(path)) {
                    continue;
                }
                debug!(extension = %extension.handle, files = paths.len(), "Sources changed");

                // Changes made during a build are covered by one more rebuild.
                loop {
                    if !builder.rebuild(&mut extension, &tx).await {
                        break 'watch;
                    }
                    let mut pending = Vec::new();
                    while let Ok(paths) = raw_rx.try_recv() {
                        pending.extend(paths);
                    }
                    if !pending.iter().any(|path| filter.is_source(path)) {
                        break;
                    }
                }
            }

            debug!(extension = %extension.handle, "Watch stopped");
        });

        Ok(rx)
    }
}

/// Decides which changed paths count as source edits.
struct SourceFilter {
    root: PathBuf,
    /// Build output, when it is separate from the extension directory.
    output: Option<PathBuf>,
}

impl SourceFilter {
    fn is_source(&self, path: &Path) -> bool {
        if self.output.as_deref().is_some_and(|out| path.starts_with(out)) {
            return false;
        }
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        !relative.components().any(|part| {
            part.as_os_str()
                .to_str()
                .is_some_and(|name| name.starts_with('.') || name == "node_modules")
        })
    }
}

/// Pick up `[build]` edits from the manifest before a rebuild. Keeps the
/// current configuration when the manifest cannot be read.
async fn reload_configuration(extension: &mut Extension) {
    let dir = extension.directory.clone();
    match tokio::task::spawn_blocking(move || load_extension(&dir)).await {
        Ok(Ok(loaded)) => extension.configuration = loaded.configuration,
        Ok(Err(e)) => {
            debug!(extension = %extension.handle, error = %e, "Keeping previous configuration")
        }
        Err(e) => debug!(extension = %extension.handle, error = %e, "Manifest reload failed"),
    }
}

fn mode_name(mode: BuildMode) -> &'static str {
    match mode {
        BuildMode::Development => "development",
        BuildMode::Production => "production",
    }
}

fn failure_message(output: &std::process::Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let lines: Vec<&str> = stderr.lines().collect();
    let tail = lines[lines.len().saturating_sub(FAILURE_TAIL_LINES)..].join("\n");
    if tail.is_empty() {
        format!("build command exited with {}", output.status)
    } else {
        tail
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with('.') || name == "node_modules")
            .unwrap_or(false)
}

fn files(dir: &Path) -> impl Iterator<Item = DirEntry> {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
}

/// Content digest of every file under `dir`, and their total size.
fn digest_dir(dir: &Path) -> Result<(String, u64), BuildError> {
    if !dir.is_dir() {
        return Err(BuildError::NotBuildable(format!(
            "build output {} does not exist",
            dir.display()
        )));
    }

    let mut hasher = Sha256::new();
    let mut size = 0;
    for entry in files(dir) {
        let relative = entry.path().strip_prefix(dir).unwrap_or(entry.path());
        let contents = std::fs::read(entry.path())?;
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update([0]);
        hasher.update(&contents);
        size += contents.len() as u64;
    }

    Ok((format!("sha256:{}", hex::encode(hasher.finalize())), size))
}
