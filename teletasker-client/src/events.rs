//! Notifications flowing from the background workers to the controller.

use shared::models::{ChatId, ChatProcessingStatus, UpdateEvent};
use tokio::sync::mpsc;

/// Sending half handed to the poller, the fetcher and the stream.
pub type EventSender = mpsc::UnboundedSender<SyncEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<SyncEvent>;

#[must_use]
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Connection state of the update stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    Connecting,
    Open,
    Closed,
}

impl StreamState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

/// Events raised by a poll chain carry its `generation`, so the controller
/// can drop those queued before the chain was superseded. Fetches the poller
/// did not start carry `None`.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A status query answered for a live poll chain.
    StatusChanged {
        status: ChatProcessingStatus,
        generation: u64,
    },
    /// A poll chain ended without completing.
    PollFailed {
        chat_id: ChatId,
        message: String,
        generation: u64,
    },
    /// The collection was refreshed; `chat_id` is `None` for the aggregate view.
    TasksUpdated {
        chat_id: Option<ChatId>,
        count: usize,
        generation: Option<u64>,
    },
    /// A fetch failed. `served_stale` is set when cached tasks were kept.
    FetchFailed {
        chat_id: Option<ChatId>,
        message: String,
        served_stale: bool,
        generation: Option<u64>,
    },
    /// A push notification from the update stream.
    Update(UpdateEvent),
    StreamState(StreamState),
}

impl SyncEvent {
    /// The chat this event concerns, if any.
    #[must_use]
    pub fn chat_id(&self) -> Option<&ChatId> {
        match self {
            Self::StatusChanged { status, .. } => status.chat_id.as_ref(),
            Self::PollFailed { chat_id, .. } => Some(chat_id),
            Self::TasksUpdated { chat_id, .. } | Self::FetchFailed { chat_id, .. } => {
                chat_id.as_ref()
            }
            Self::Update(update) => update.chat_id(),
            Self::StreamState(_) => None,
        }
    }

    /// The poll chain that raised this event, if one did.
    #[must_use]
    pub fn generation(&self) -> Option<u64> {
        match self {
            Self::StatusChanged { generation, .. } | Self::PollFailed { generation, .. } => {
                Some(*generation)
            }
            Self::TasksUpdated { generation, .. } | Self::FetchFailed { generation, .. } => {
                *generation
            }
            Self::Update(_) | Self::StreamState(_) => None,
        }
    }
}
