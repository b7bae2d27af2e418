//! Audit sink.
//!
//! An append-only, structured event log. The sink is an injected dependency
//! with an explicit lifecycle: opened at process start, flushed and closed at
//! shutdown. Events are serialized as JSON lines by a background writer fed
//! over a channel, so concurrent request handlers never block on the file;
//! every event is also mirrored to `tracing`.
//!
//! The sink is write-only. Nothing in the application reads it back.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Severity of an audit event.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditLevel {
    Info,
    Warn,
    /// Possible attack or integrity anomaly. Logged distinctly from
    /// ordinary validation failures.
    Security,
}

/// Subsystem that produced an event.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    Auth,
    Authz,
    Catalog,
    Order,
    Payment,
    Fulfillment,
    Account,
}

/// A single append-only audit record.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub level: AuditLevel,
    pub category: AuditCategory,
    /// Machine-readable action name, e.g. `order_created`.
    pub action: &'static str,
    /// Acting identity id, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    /// Affected resource id, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Free-form structured context.
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub context: serde_json::Value,
}

impl AuditEvent {
    /// Build an event stamped with the current time.
    #[must_use]
    pub fn new(level: AuditLevel, category: AuditCategory, action: &'static str) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            category,
            action,
            actor: None,
            subject: None,
            context: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn actor(mut self, actor: impl ToString) -> Self {
        self.actor = Some(actor.to_string());
        self
    }

    #[must_use]
    pub fn subject(mut self, subject: impl ToString) -> Self {
        self.subject = Some(subject.to_string());
        self
    }

    #[must_use]
    pub fn context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }
}

struct Inner {
    /// Taken out (for every clone at once) when the sink is closed.
    tx: Mutex<Option<mpsc::UnboundedSender<AuditEvent>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the audit log.
///
/// Cheap to clone; all clones feed the same writer and close together.
#[derive(Clone)]
pub struct AuditSink {
    inner: Arc<Inner>,
}

impl AuditSink {
    /// Open the sink, appending to the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be opened for append.
    pub async fn open(path: &Path) -> std::io::Result<Self> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        let mut file = tokio::io::BufWriter::new(file);

        let (tx, mut rx) = mpsc::unbounded_channel::<AuditEvent>();
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match serde_json::to_vec(&event) {
                    Ok(mut line) => {
                        line.push(b'\n');
                        if let Err(e) = file.write_all(&line).await {
                            tracing::error!("audit write failed: {e}");
                        }
                    }
                    Err(e) => tracing::error!("audit serialization failed: {e}"),
                }
            }
            if let Err(e) = file.flush().await {
                tracing::error!("audit flush failed: {e}");
            }
        });

        Ok(Self {
            inner: Arc::new(Inner {
                tx: Mutex::new(Some(tx)),
                writer: Mutex::new(Some(handle)),
            }),
        })
    }

    /// A sink that only mirrors to `tracing`. For tests and the CLI.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            inner: Arc::new(Inner {
                tx: Mutex::new(None),
                writer: Mutex::new(None),
            }),
        }
    }

    /// Record an event.
    ///
    /// Never fails from the caller's perspective: a closed writer is
    /// reported through `tracing` and the request proceeds.
    pub fn record(&self, event: AuditEvent) {
        match event.level {
            AuditLevel::Info => tracing::info!(
                category = ?event.category,
                action = event.action,
                actor = event.actor.as_deref(),
                subject = event.subject.as_deref(),
                "audit"
            ),
            AuditLevel::Warn => tracing::warn!(
                category = ?event.category,
                action = event.action,
                actor = event.actor.as_deref(),
                subject = event.subject.as_deref(),
                "audit"
            ),
            AuditLevel::Security => tracing::warn!(
                category = ?event.category,
                action = event.action,
                actor = event.actor.as_deref(),
                subject = event.subject.as_deref(),
                security = true,
                "audit"
            ),
        }

        let sender = self
            .inner
            .tx
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().cloned());
        if let Some(tx) = sender
            && tx.send(event).is_err()
        {
            tracing::error!("audit sink closed; event dropped");
        }
    }

    /// Flush and close the sink. Call once at shutdown.
    ///
    /// Dropping the shared sender closes the channel; the writer drains the
    /// queue, flushes, and exits. Events recorded after close are only
    /// mirrored to `tracing`.
    pub async fn close(&self) {
        if let Ok(mut guard) = self.inner.tx.lock() {
            guard.take();
        }
        let handle = self
            .inner
            .writer
            .lock()
            .ok()
            .and_then(|mut guard| guard.take());
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            tracing::error!("audit writer task failed: {e}");
        }
    }
}
