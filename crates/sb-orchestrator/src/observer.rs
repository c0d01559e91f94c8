use serde::{Deserialize, Serialize};
use uuid::Uuid;

use sb_core::types::{Epic, Task};

use crate::reconciler::ReconciliationResult;

/// Notification emitted by the epic manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EpicEvent {
    EpicCreated { epic: Epic },
    TaskCreated { epic_id: Uuid, task: Task },
    TransitionReconciled { epic_id: Uuid, result: ReconciliationResult },
}

/// Hooks called by the epic manager after each state change.
///
/// Every hook defaults to doing nothing. Hooks run inline on the caller's
/// task and must not block.
pub trait EpicObserver: Send + Sync {
    fn epic_created(&self, _epic: &Epic) {}

    fn task_created(&self, _epic_id: Uuid, _task: &Task) {}

    fn transition_reconciled(&self, _epic_id: Uuid, _result: &ReconciliationResult) {}
}

/// Forwards every hook as an [`EpicEvent`] on a flume channel.
///
/// Events are dropped once the receiver is gone.
#[derive(Clone)]
pub struct ChannelObserver {
    tx: flume::Sender<EpicEvent>,
}

impl ChannelObserver {
    /// Create an observer with an unbounded channel and return its receiver.
    pub fn new() -> (Self, flume::Receiver<EpicEvent>) {
        let (tx, rx) = flume::unbounded();
        (Self { tx }, rx)
    }

    fn send(&self, event: EpicEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("epic event receiver dropped");
        }
    }
}

impl EpicObserver for ChannelObserver {
    fn epic_created(&self, epic: &Epic) {
        self.send(EpicEvent::EpicCreated { epic: epic.clone() });
    }

    fn task_created(&self, epic_id: Uuid, task: &Task) {
        self.send(EpicEvent::TaskCreated {
            epic_id,
            task: task.clone(),
        });
    }

    fn transition_reconciled(&self, epic_id: Uuid, result: &ReconciliationResult) {
        self.send(EpicEvent::TransitionReconciled {
            epic_id,
            result: result.clone(),
        });
    }
}
