//! # palaver-client
//!
//! The widget core: a host-embeddable chat client that exchanges text,
//! image, and location messages with a backend application over a REST
//! API plus a publish/subscribe channel for realtime delivery.
//!
//! The crate owns conversation reconciliation (optimistic records merged
//! against server-confirmed ones), the pub/sub subscription lifecycle,
//! coalesced profile sync, and the [`widget::Widget`] lifecycle façade.
//! Presentation is an external concern: hosts subscribe to
//! [`events::WidgetEvent`]s and read state snapshots.

use tracing_subscriber::{fmt, EnvFilter};

pub mod api;
pub mod config;
pub mod conversation;
pub mod events;
pub mod geo;
pub mod pubsub;
pub mod session;
pub mod throttle;
pub mod user;
pub mod widget;

mod error;

#[cfg(test)]
mod testing;

pub use config::{Config, UiText};
pub use conversation::MessagePayload;
pub use error::{ClientError, Result};
pub use events::WidgetEvent;
pub use session::Session;
pub use widget::{Widget, WidgetDeps};

/// Opt-in tracing setup for hosts that don't configure their own
/// subscriber. Safe to call more than once.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("palaver_client=debug,palaver_store=info,warn"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
