//! Execution events, the reporting interface.
//!
//! For each node the engine emits exactly one sequence: `Started` followed
//! by exactly one of `Skipped` / `Finished`, plus a `Registered` event for
//! dynamically produced children before their own `Started`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::node::{TestOutcome, UniqueId};

/// One reporting event for one node.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// A dynamically produced child was registered.
    Registered {
        unique_id: UniqueId,
        display_name: String,
        timestamp: DateTime<Utc>,
    },
    Started {
        unique_id: UniqueId,
        display_name: String,
        timestamp: DateTime<Utc>,
    },
    Skipped {
        unique_id: UniqueId,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    Finished {
        unique_id: UniqueId,
        outcome: TestOutcome,
        timestamp: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    pub fn unique_id(&self) -> &UniqueId {
        match self {
            ExecutionEvent::Registered { unique_id, .. }
            | ExecutionEvent::Started { unique_id, .. }
            | ExecutionEvent::Skipped { unique_id, .. }
            | ExecutionEvent::Finished { unique_id, .. } => unique_id,
        }
    }
}

/// Event receiver handed to reporting listeners.
pub type EventReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

/// Sender wrapper for execution events, with an atomic active flag so that
/// event emission can be cheaply skipped when no listener is attached.
#[derive(Clone)]
pub struct EventEmitter {
    tx: Option<mpsc::UnboundedSender<ExecutionEvent>>,
    active: Arc<AtomicBool>,
}

impl EventEmitter {
    /// Create an emitter/receiver pair.
    pub fn channel() -> (EventEmitter, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            EventEmitter {
                tx: Some(tx),
                active: Arc::new(AtomicBool::new(true)),
            },
            rx,
        )
    }

    /// An emitter that drops every event.
    pub fn disabled() -> EventEmitter {
        EventEmitter {
            tx: None,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn emit(&self, event: ExecutionEvent) {
        if !self.is_active() {
            return;
        }
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                // listener went away; stop paying for sends
                self.active.store(false, Ordering::Relaxed);
            }
        }
    }
}
