//! Per-jurisdiction log routing
//!
//! Thousands of jurisdiction tasks run concurrently on one runtime, so
//! records are routed to per-jurisdiction log files instead of a single
//! interleaved stream. A tokio task-local holds the active jurisdiction
//! name; [`JurisdictionLayer`] tags each record with it and forwards the
//! formatted line to a [`LogListener`] queue, which decouples producers
//! from disk I/O and preserves per-jurisdiction ordering. Records emitted
//! with no active jurisdiction go to `main.log`; ERROR records are
//! additionally mirrored to `error.log` so at least one copy survives a
//! detached stdout.
//!
//! Service workers re-enter the submitting task's scope (see
//! `services::base`), so logs emitted while processing a queued job land in
//! the correct jurisdiction file.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::Level;
use tracing::field::{Field, Visit};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

tokio::task_local! {
    static JURISDICTION: String;
}

/// Run a future with the given jurisdiction name bound as the active log
/// scope.
pub async fn scope<F: Future>(name: String, fut: F) -> F::Output {
    JURISDICTION.scope(name, fut).await
}

/// The jurisdiction bound to the current task, if any
pub fn current_jurisdiction() -> Option<String> {
    JURISDICTION.try_with(Clone::clone).ok()
}

/// A single formatted record en route to disk
#[derive(Debug)]
enum LogRecord {
    Line {
        jurisdiction: Option<String>,
        level: Level,
        line: String,
    },
    /// Sentinel ending the writer loop even while layer clones of the
    /// sender are still alive (e.g. inside a global subscriber)
    Shutdown,
}

/// Handle to the queued log writer.
///
/// Dropping the handle closes the queue; `close()` additionally joins the
/// writer so all buffered records reach disk.
pub struct LogListener {
    tx: Option<mpsc::UnboundedSender<LogRecord>>,
    writer: Option<tokio::task::JoinHandle<()>>,
}

impl LogListener {
    /// Start the listener, writing per-jurisdiction files into `log_dir`.
    pub fn start(log_dir: impl Into<PathBuf>) -> Self {
        let log_dir = log_dir.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::task::spawn_blocking(move || write_records(&log_dir, rx));
        Self {
            tx: Some(tx),
            writer: Some(writer),
        }
    }

    /// Layer that routes records through this listener.
    ///
    /// The writer drains only after every layer clone has been dropped, so
    /// drop the subscriber holding the layer before calling `close`.
    pub fn layer(&self) -> JurisdictionLayer {
        JurisdictionLayer {
            tx: self.tx.clone().unwrap_or_else(|| {
                let (tx, _) = mpsc::unbounded_channel();
                tx
            }),
        }
    }

    /// Close the queue and wait for the writer to drain.
    pub async fn close(mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(LogRecord::Shutdown);
        }
        if let Some(handle) = self.writer.take() {
            let _ = handle.await;
        }
    }
}

fn write_records(log_dir: &Path, mut rx: mpsc::UnboundedReceiver<LogRecord>) {
    if let Err(err) = std::fs::create_dir_all(log_dir) {
        eprintln!("could not create log dir {}: {err}", log_dir.display());
        return;
    }
    let mut files: HashMap<String, File> = HashMap::new();
    while let Some(record) = rx.blocking_recv() {
        let (jurisdiction, level, line) = match record {
            LogRecord::Line {
                jurisdiction,
                level,
                line,
            } => (jurisdiction, level, line),
            LogRecord::Shutdown => break,
        };
        let file_name = match &jurisdiction {
            Some(name) => format!("{}.log", sanitize_file_stem(name)),
            None => "main.log".to_string(),
        };
        append_line(log_dir, &mut files, &file_name, &line);
        if level == Level::ERROR {
            append_line(log_dir, &mut files, "error.log", &line);
        }
    }
}

fn append_line(log_dir: &Path, files: &mut HashMap<String, File>, name: &str, line: &str) {
    if !files.contains_key(name) {
        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_dir.join(name))
        {
            Ok(file) => {
                files.insert(name.to_string(), file);
            }
            Err(err) => {
                eprintln!("could not open log file {name}: {err}");
                return;
            }
        }
    }
    if let Some(file) = files.get_mut(name) {
        let _ = writeln!(file, "{line}");
        let _ = file.flush();
    }
}

/// Replace path-hostile characters so jurisdiction names make valid file
/// stems.
pub fn sanitize_file_stem(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// `tracing_subscriber` layer that routes events into the listener queue,
/// tagged with the task's active jurisdiction.
pub struct JurisdictionLayer {
    tx: mpsc::UnboundedSender<LogRecord>,
}

impl<S: tracing::Subscriber> Layer<S> for JurisdictionLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut message = MessageVisitor::default();
        event.record(&mut message);
        let meta = event.metadata();
        let line = format!(
            "{} [{}] {}: {}",
            Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            meta.level(),
            meta.target(),
            message.rendered()
        );
        let _ = self.tx.send(LogRecord::Line {
            jurisdiction: current_jurisdiction(),
            level: *meta.level(),
            line,
        });
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: Option<String>,
    fields: Vec<(String, String)>,
}

impl MessageVisitor {
    fn rendered(&self) -> String {
        let mut out = self.message.clone().unwrap_or_default();
        for (name, value) in &self.fields {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(&format!("{name}={value}"));
        }
        out
    }
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{value:?}"));
        } else {
            self.fields.push((field.name().to_string(), format!("{value:?}")));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::{error, info};
    use tracing_subscriber::layer::SubscriberExt;

    #[tokio::test]
    async fn test_scope_binds_jurisdiction() {
        assert_eq!(current_jurisdiction(), None);
        let seen = scope("Decatur County, Indiana".to_string(), async {
            current_jurisdiction()
        })
        .await;
        assert_eq!(seen.as_deref(), Some("Decatur County, Indiana"));
        assert_eq!(current_jurisdiction(), None);
    }

    // current-thread runtime so the thread-local subscriber sees every
    // event emitted by the test tasks
    #[tokio::test]
    async fn test_records_routed_to_separate_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let listener = LogListener::start(dir.path());
        let subscriber = tracing_subscriber::registry().with(listener.layer());

        let _guard = tracing::subscriber::set_default(subscriber);
        for name in ["alpha", "beta"] {
            scope(name.to_string(), async {
                info!("processing {name}");
            })
            .await;
        }
        info!("no jurisdiction bound");
        error!("fatal record");
        drop(_guard);

        listener.close().await;

        let alpha = std::fs::read_to_string(dir.path().join("alpha.log")).expect("alpha log");
        assert!(alpha.contains("processing alpha"));
        assert!(!alpha.contains("processing beta"));

        let beta = std::fs::read_to_string(dir.path().join("beta.log")).expect("beta log");
        assert!(beta.contains("processing beta"));

        let main = std::fs::read_to_string(dir.path().join("main.log")).expect("main log");
        assert!(main.contains("no jurisdiction bound"));

        let errors = std::fs::read_to_string(dir.path().join("error.log")).expect("error log");
        assert!(errors.contains("fatal record"));
    }

    #[test]
    fn test_sanitize_file_stem() {
        assert_eq!(
            sanitize_file_stem("Decatur County, Indiana"),
            "Decatur_County__Indiana"
        );
    }
}
