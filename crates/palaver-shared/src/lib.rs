//! # palaver-shared
//!
//! Domain types shared by the palaver widget crates: message and user
//! models, media helpers for image attachments, and the constants that
//! govern timeouts and allow-lists.
//!
//! Everything here is plain data and pure functions; network and state
//! concerns live in `palaver-client` and `palaver-store`.

pub mod constants;
pub mod media;
pub mod message;
pub mod types;
pub mod user;

mod error;

pub use error::MediaError;
pub use message::Message;
pub use types::*;
pub use user::{AppInfo, ClientInfo, Integration, User};
