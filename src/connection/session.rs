//! Shared state of one connection attempt.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::debug;

use crate::connection::state::{ConnectionState, StateMachine};
use crate::error::Result;
use crate::message::CloseFrame;

/// State machine shared by the facade, the sender and the dispatcher.
///
/// Every change is published on a watch channel; the dispatcher treats a
/// change as its shutdown signal and [`closed`](Self::closed) waits on it.
#[derive(Debug)]
pub struct Session {
    machine: Mutex<StateMachine>,
    state_tx: watch::Sender<ConnectionState>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Session in `Connecting`.
    #[must_use]
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);
        Self {
            machine: Mutex::new(StateMachine::new()),
            state_tx,
        }
    }

    fn machine(&self) -> MutexGuard<'_, StateMachine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.machine().state()
    }

    /// Close status, once `Closed`.
    #[must_use]
    pub fn close_frame(&self) -> Option<CloseFrame> {
        self.machine().close_frame().cloned()
    }

    /// Apply a transition and publish it.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTransition` if the machine rejects it.
    pub fn transition(&self, to: ConnectionState) -> Result<()> {
        let mut machine = self.machine();
        let from = machine.state();
        machine.transition(to)?;
        self.state_tx.send_replace(to);
        drop(machine);
        debug!(from = %from, to = %to, "state transition");
        Ok(())
    }

    /// Move to `Closed` recording `frame`. Returns `false` if the session was
    /// already closed, in which case the earlier record stands.
    pub fn close(&self, frame: CloseFrame) -> bool {
        let mut machine = self.machine();
        let from = machine.state();
        let code = frame.code;
        if machine.close(frame).is_err() {
            return false;
        }
        self.state_tx.send_replace(ConnectionState::Closed);
        drop(machine);
        debug!(from = %from, code = %code, "connection closed");
        true
    }

    /// Receiver observing every published state.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Wait until the session is `Closed`.
    pub async fn closed(&self) {
        let mut rx = self.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|state| *state == ConnectionState::Closed).await;
    }
}
