//! Event reporting surface handed to a running foreign runner.

use std::collections::HashMap;

use chrono::Utc;

use crate::error::Failure;
use crate::events::{EventEmitter, ExecutionEvent};
use crate::node::{TestOutcome, UniqueId};

use super::description::ForeignDescription;

/// Translates a foreign runner's progress callbacks into execution events
/// under the adapter node's id, so externally driven units report through
/// the same listener channel as engine-scheduled ones.
pub struct ForeignNotifier {
    base: UniqueId,
    ids: HashMap<String, UniqueId>,
    emitter: EventEmitter,
}

impl ForeignNotifier {
    pub(crate) fn new(
        base: UniqueId,
        description: &ForeignDescription,
        emitter: EventEmitter,
    ) -> Self {
        let mut ids = HashMap::new();
        for child in description.children() {
            Self::index(&base, child, &mut ids);
        }
        ForeignNotifier { base, ids, emitter }
    }

    fn index(parent: &UniqueId, description: &ForeignDescription, ids: &mut HashMap<String, UniqueId>) {
        let segment_type = if description.is_test() { "test" } else { "container" };
        let id = parent.append(segment_type, description.name());
        for child in description.children() {
            Self::index(&id, child, ids);
        }
        ids.insert(description.name().to_string(), id);
    }

    /// Id for a named unit; units outside the advertised plan get an id
    /// appended directly under the adapter node.
    fn id_for(&self, name: &str) -> UniqueId {
        self.ids
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.base.append("test", name))
    }

    /// Announce a unit discovered only at run time.
    pub fn fire_registered(&self, name: &str) {
        self.emitter.emit(ExecutionEvent::Registered {
            unique_id: self.id_for(name),
            display_name: name.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn fire_started(&self, name: &str) {
        self.emitter.emit(ExecutionEvent::Started {
            unique_id: self.id_for(name),
            display_name: name.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn fire_skipped(&self, name: &str, reason: impl Into<String>) {
        self.emitter.emit(ExecutionEvent::Skipped {
            unique_id: self.id_for(name),
            reason: reason.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn fire_passed(&self, name: &str) {
        self.fire_finished(name, TestOutcome::Passed);
    }

    pub fn fire_failed(&self, name: &str, failure: Failure) {
        self.fire_finished(name, TestOutcome::Failed(failure));
    }

    pub fn fire_aborted(&self, name: &str, reason: Option<String>) {
        self.fire_finished(name, TestOutcome::Aborted(reason));
    }

    fn fire_finished(&self, name: &str, outcome: TestOutcome) {
        self.emitter.emit(ExecutionEvent::Finished {
            unique_id: self.id_for(name),
            outcome,
            timestamp: Utc::now(),
        });
    }
}
