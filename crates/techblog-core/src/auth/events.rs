use tokio::sync::broadcast;
use tracing::debug;

use super::session::UserIdentity;

/// Buffer size for the session event channel.
/// Transitions are rare; a slow listener that falls this far behind skips ahead.
const EVENT_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutReason {
    /// The user asked to log out
    User,
    /// The server rejected a request's credentials
    Forced,
}

/// Notifications about session transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn {
        generation: u64,
        user: UserIdentity,
    },
    SignedOut {
        generation: u64,
        reason: SignOutReason,
    },
}

impl SessionEvent {
    pub fn generation(&self) -> u64 {
        match self {
            SessionEvent::SignedIn { generation, .. } => *generation,
            SessionEvent::SignedOut { generation, .. } => *generation,
        }
    }

    pub fn is_forced_logout(&self) -> bool {
        matches!(
            self,
            SessionEvent::SignedOut {
                reason: SignOutReason::Forced,
                ..
            }
        )
    }
}

/// Broadcast channel for session events, owned by the session manager.
pub struct SessionEvents {
    sender: broadcast::Sender<SessionEvent>,
}

impl SessionEvents {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Deliver to every current subscriber. Having none is fine.
    pub fn emit(&self, event: SessionEvent) {
        match self.sender.send(event) {
            Ok(receivers) => debug!(receivers, "Session event delivered"),
            Err(_) => debug!("Session event dropped, no listeners"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new()
    }
}
