use tracing::info;

use crate::poll::EventId;

/// Milestones of one event on its way through a dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Retrieved,
    Dispatched,
    Done,
}

impl Stage {
    pub fn marker(&self) -> &'static str {
        match self {
            Stage::Retrieved => "EVENT_LIFECYCLE_RETRIEVED",
            Stage::Dispatched => "EVENT_LIFECYCLE_DISPATCHED",
            Stage::Done => "EVENT_LIFECYCLE_DONE",
        }
    }
}

/// Receives lifecycle events. Workers report `Done` from their own threads.
pub trait LifecycleSink: Send + Sync {
    fn record(&self, stage: Stage, event: &EventId);
}

/// Logs `<MARKER>:<event id>` lines under the `lifecycle` target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl LifecycleSink for TracingSink {
    fn record(&self, stage: Stage, event: &EventId) {
        info!(target: "lifecycle", "{}:{}", stage.marker(), event);
    }
}
