//! Identity provider interface.
//!
//! The loop needs two things from authentication: whether someone is signed in
//! (to gate session start and scope persistence) and a stream of sign-in and
//! sign-out events (to resume a start that was waiting for sign-in).
//!
//! # Example
//!
//! ```
//! use bloom_store::UserId;
//! use bloom_tutor::identity::{IdentityEvent, IdentityProvider, LocalIdentity};
//!
//! # async fn example() {
//! let identity = LocalIdentity::new();
//! let mut events = identity.subscribe();
//!
//! identity.sign_in(UserId::new("learner-1"));
//!
//! assert_eq!(identity.current_user(), Some(UserId::new("learner-1")));
//! if let Ok(IdentityEvent::SignedIn(user)) = events.recv().await {
//!     println!("Signed in: {user}");
//! }
//! # }
//! ```

use bloom_store::UserId;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tracing::info;

/// Default buffer size of the identity event channel.
const EVENT_CAPACITY: usize = 16;

/// A change in who is signed in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "user", rename_all = "snake_case")]
pub enum IdentityEvent {
    /// A user signed in.
    SignedIn(UserId),
    /// The current user signed out.
    SignedOut,
}

/// Source of the current user and of identity-change events.
pub trait IdentityProvider: Send + Sync {
    /// Returns the signed-in user, if any.
    fn current_user(&self) -> Option<UserId>;

    /// Subscribes to identity-change events emitted after this call.
    fn subscribe(&self) -> broadcast::Receiver<IdentityEvent>;
}

/// In-process identity provider.
///
/// Used by the terminal client, where the learner types a name instead of
/// authenticating against a remote service, and by tests.
#[derive(Debug, Clone)]
pub struct LocalIdentity {
    current: std::sync::Arc<watch::Sender<Option<UserId>>>,
    events: broadcast::Sender<IdentityEvent>,
}

impl LocalIdentity {
    /// Creates a provider with nobody signed in.
    #[must_use]
    pub fn new() -> Self {
        let (current, _) = watch::channel(None);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            current: std::sync::Arc::new(current),
            events,
        }
    }

    /// Creates a provider with `user` already signed in, without emitting an event.
    #[must_use]
    pub fn signed_in_as(user: UserId) -> Self {
        let identity = Self::new();
        identity.current.send_replace(Some(user));
        identity
    }

    /// Signs `user` in and broadcasts [`IdentityEvent::SignedIn`].
    ///
    /// Returns the number of subscribers that will see the event.
    pub fn sign_in(&self, user: UserId) -> usize {
        info!(user = %user, "User signed in");
        self.current.send_replace(Some(user.clone()));
        self.events.send(IdentityEvent::SignedIn(user)).unwrap_or(0)
    }

    /// Signs the current user out and broadcasts [`IdentityEvent::SignedOut`].
    pub fn sign_out(&self) -> usize {
        if let Some(user) = self.current.send_replace(None) {
            info!(user = %user, "User signed out");
        }
        self.events.send(IdentityEvent::SignedOut).unwrap_or(0)
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.events.receiver_count()
    }
}

impl Default for LocalIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityProvider for LocalIdentity {
    fn current_user(&self) -> Option<UserId> {
        self.current.borrow().clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<IdentityEvent> {
        self.events.subscribe()
    }
}
