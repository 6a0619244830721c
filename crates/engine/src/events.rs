//! Execution events and observers.
//!
//! Events are emitted as a run progresses so consumers can stream progress
//! to a UI, persist state or log it. The engine calls [`RunObserver::notify`]
//! synchronously from the dispatch loop and node tasks, so implementations
//! must not block.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::policy::FailureKind;
use crate::result::RunStatus;

/// Events emitted during workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
    RunStarted {
        run_id: Uuid,
        workflow: String,
    },
    /// An attempt of a node has started.
    NodeStarted {
        run_id: Uuid,
        node_id: String,
        attempt: u32,
    },
    /// An attempt failed and the node will be retried after `delay_ms`.
    NodeRetrying {
        run_id: Uuid,
        node_id: String,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    NodeSucceeded {
        run_id: Uuid,
        node_id: String,
    },
    NodeFailed {
        run_id: Uuid,
        node_id: String,
        kind: FailureKind,
        error: String,
    },
    NodeSkipped {
        run_id: Uuid,
        node_id: String,
        reason: String,
    },
    RunFinished {
        run_id: Uuid,
        status: RunStatus,
    },
}

/// Receives execution events.
pub trait RunObserver: Send + Sync {
    fn notify(&self, event: ExecutionEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {
    fn notify(&self, _event: ExecutionEvent) {}
}

/// Forwards events to an unbounded channel.
///
/// Event volume is a handful per node, so the channel is unbounded and the
/// engine never waits on a slow consumer.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelObserver {
    pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
        Self { sender }
    }

    /// An observer together with the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ExecutionEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(sender), receiver)
    }
}

impl RunObserver for ChannelObserver {
    fn notify(&self, event: ExecutionEvent) {
        // The receiver may have gone away; events are best-effort.
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_tag() {
        let event = ExecutionEvent::NodeSkipped {
            run_id: Uuid::nil(),
            node_id: "aggregate_results".into(),
            reason: "upstream failure: 'classify'".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "node_skipped");
        assert_eq!(json["node_id"], "aggregate_results");
    }

    #[test]
    fn channel_observer_survives_dropped_receiver() {
        let (observer, receiver) = ChannelObserver::channel();
        drop(receiver);
        observer.notify(ExecutionEvent::RunStarted {
            run_id: Uuid::nil(),
            workflow: "w".into(),
        });
    }
}
