//! Connection lifecycle state.

use std::fmt;

use tokio::sync::watch;

/// Lifecycle state of a [`super::Connection`].
///
/// States only move forward: `Created → Connecting → Connected → Closing →
/// Closed`, with `Closed` reachable from any state and terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Constructed, `connect` not yet called.
    Created,
    /// Establishing the transport or running pre-connect hooks.
    Connecting,
    /// Ready for traffic.
    Connected,
    /// Shutting down; outstanding requests are being swept.
    Closing,
    /// Terminal.
    Closed,
}

impl ConnectionState {
    /// Lower-case name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }

    /// Returns `true` for `Closing` and `Closed`.
    #[must_use]
    pub const fn is_shutting_down(self) -> bool { matches!(self, Self::Closing | Self::Closed) }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Observable state cell backed by a `watch` channel.
pub(super) struct StateCell(watch::Sender<ConnectionState>);

impl StateCell {
    pub(super) fn new() -> Self { Self(watch::Sender::new(ConnectionState::Created)) }

    pub(super) fn get(&self) -> ConnectionState { *self.0.borrow() }

    pub(super) fn subscribe(&self) -> watch::Receiver<ConnectionState> { self.0.subscribe() }

    /// Move to `to` if the current state satisfies `allowed`.
    pub(super) fn transition(
        &self,
        allowed: impl FnOnce(ConnectionState) -> bool,
        to: ConnectionState,
    ) -> bool {
        let moved = self.0.send_if_modified(|state| {
            if allowed(*state) {
                *state = to;
                true
            } else {
                false
            }
        });
        if moved {
            tracing::debug!(state = to.as_str(), "connection state changed");
        }
        moved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_respect_guard() {
        let cell = StateCell::new();
        assert!(cell.transition(|s| s == ConnectionState::Created, ConnectionState::Connecting));
        assert!(!cell.transition(|s| s == ConnectionState::Created, ConnectionState::Connected));
        assert_eq!(cell.get(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn subscribers_observe_changes() {
        let cell = StateCell::new();
        let mut rx = cell.subscribe();
        cell.transition(|_| true, ConnectionState::Closed);
        rx.changed().await.expect("sender alive");
        assert_eq!(*rx.borrow(), ConnectionState::Closed);
        assert!(ConnectionState::Closed.is_shutting_down());
    }
}
