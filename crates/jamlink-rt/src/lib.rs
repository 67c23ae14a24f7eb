//! JamLink RT primitives
//! ======================
//! Lock-free plumbing shared between the audio callback, the network worker
//! and the UI thread: the connection status mirror, the lossy UI event
//! queue, and the flat atomic snapshot the UI samples every frame.

#![cfg_attr(not(test), warn(clippy::pedantic))]

mod queue;
mod snapshot;
mod status;

pub use queue::EventQueue;
pub use snapshot::UiSnapshot;
pub use status::{ConnectionStatus, StatusCell};

/// Discrete event pushed by the network worker and drained by the UI.
///
/// Events are advisory; when the queue is full the worker drops them and the
/// UI catches up from the status mirror and snapshot instead.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UiEvent {
    /// Connection state changed. `detail` carries the failure reason when
    /// the new status is [`ConnectionStatus::Failed`].
    StatusChanged {
        status: ConnectionStatus,
        detail: Option<String>,
    },
    /// The peer/channel roster changed; the UI should re-read it.
    UserInfoChanged,
    /// Server topic line.
    TopicChanged(String),
    /// Non-fatal condition worth showing (codec drop, capacity refusal).
    Notice(String),
}

impl UiEvent {
    #[inline]
    pub fn kind_id(&self) -> u8 {
        match self {
            UiEvent::StatusChanged { .. } => 1,
            UiEvent::UserInfoChanged => 2,
            UiEvent::TopicChanged(_) => 3,
            UiEvent::Notice(_) => 4,
        }
    }
}
