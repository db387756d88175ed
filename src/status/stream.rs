use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{StatusStore, TaskState, TaskStatus};

/// What a client sees for one poll of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusFrame {
    pub state: TaskState,
    /// The payload object, `null` while pending, or for FAILURE the payload
    /// rendered as a string.
    pub details: serde_json::Value,
}

impl From<TaskStatus> for StatusFrame {
    fn from(status: TaskStatus) -> Self {
        let details = match (status.state, status.payload) {
            (_, None) => serde_json::Value::Null,
            (TaskState::Failure, Some(payload)) => serde_json::Value::String(
                serde_json::to_string(&payload).unwrap_or_else(|_| payload.status.clone()),
            ),
            (_, Some(payload)) => serde_json::to_value(&payload).unwrap_or(serde_json::Value::Null),
        };
        Self { state: status.state, details }
    }
}

impl StatusFrame {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

struct PollState {
    store: Arc<dyn StatusStore>,
    task_id: String,
    interval: Duration,
    polls: u64,
    finished: bool,
}

/// Poll `task_id` every `interval`, yielding one frame per poll and ending
/// right after the first terminal frame.
///
/// A store error ends the stream with a FAILURE frame carrying the error.
pub fn status_stream(
    store: Arc<dyn StatusStore>,
    task_id: String,
    interval: Duration,
) -> impl Stream<Item = StatusFrame> + Send {
    let state = PollState {
        store,
        task_id,
        interval,
        polls: 0,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        if state.finished {
            return None;
        }
        if state.polls > 0 {
            tokio::time::sleep(state.interval).await;
        }
        state.polls += 1;

        let frame = match state.store.poll(&state.task_id).await {
            Ok(status) => StatusFrame::from(status),
            Err(e) => {
                warn!(task_id = %state.task_id, error = %e, "Status poll failed");
                StatusFrame {
                    state: TaskState::Failure,
                    details: serde_json::Value::String(e.status_message()),
                }
            }
        };

        state.finished = frame.is_terminal();
        Some((frame, state))
    })
}
