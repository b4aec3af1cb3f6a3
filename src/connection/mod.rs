//! Connection lifecycle: state machine, outbound sender and inbound
//! dispatcher.
//!
//! ## Connection Lifecycle
//!
//! 1. **Connecting** - transport connect and opening handshake
//! 2. **Open** - messages flow both ways
//! 3. **ClosingLocal** / **ClosingRemote** - closing handshake started by
//!    us or by the server
//! 4. **Closed** - terminal; the close status is recorded
//!
//! Any active state drops straight to `Closed` when the transport fails.

pub(crate) mod dispatcher;
mod fragmenter;
mod sender;
mod session;
mod state;

use tokio::time::Instant;

pub use fragmenter::MessageFragmenter;
pub use sender::Sender;
pub use session::Session;
pub use state::{ConnectionState, StateMachine};

/// Sleep until `deadline`, or forever when there is none.
pub(crate) async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
