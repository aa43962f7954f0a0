use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{error, warn};

use crate::{EntryId, QueryId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// Every attempt of one recompute failed; the last good value stays visible.
    RetriesExhausted { attempts: u32, error: String },
    /// A worker task found no pending obligation to discharge.
    CounterUnderflow,
    /// `detach` without a matching `attach`.
    DetachWithoutAttach,
}

/// Non-fatal event recorded by the scheduler. Subscribers never see these;
/// they only ever see values.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub query: QueryId,
    pub entry: EntryId,
    pub kind: DiagnosticKind,
    pub at: DateTime<Utc>,
}

impl Diagnostic {
    pub fn new(query: QueryId, entry: EntryId, kind: DiagnosticKind) -> Self {
        Self {
            query,
            entry,
            kind,
            at: Utc::now(),
        }
    }
}

/// Diagnostic stream. Every event is also logged.
pub struct Diagnostics {
    tx: broadcast::Sender<Diagnostic>,
}

impl Diagnostics {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Diagnostic> {
        self.tx.subscribe()
    }

    pub fn report(&self, diagnostic: Diagnostic) {
        match &diagnostic.kind {
            DiagnosticKind::RetriesExhausted { attempts, error } => {
                error!(
                    query = %diagnostic.query,
                    entry = %diagnostic.entry,
                    "Recompute abandoned after {} attempts: {}",
                    attempts, error
                );
            }
            DiagnosticKind::CounterUnderflow => {
                warn!(
                    query = %diagnostic.query,
                    entry = %diagnostic.entry,
                    "Pending signal counter underflow, treating as zero"
                );
            }
            DiagnosticKind::DetachWithoutAttach => {
                warn!(
                    query = %diagnostic.query,
                    entry = %diagnostic.entry,
                    "Detach without matching attach ignored"
                );
            }
        }
        // No receivers is fine: the log line above is the record.
        let _ = self.tx.send(diagnostic);
    }
}
