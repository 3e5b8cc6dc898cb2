//! Profile updater: coalesces rapid attribute changes into infrequent
//! writes while keeping a fast path for sends.
//!
//! The coalescing is deliberately not a classic debounce: the first update
//! in a window is written immediately, later updates in the same window
//! are merged into a pending buffer and flushed by the write that opens
//! the next window. Callers that land inside a window get the scheduled
//! flush's future, so everyone observes the write that actually carried
//! their props.

use std::sync::Arc;

use futures::FutureExt;
use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{debug, error};

use palaver_shared::user::{is_profile_dirty, strip_to_editable};
use palaver_shared::User;

use crate::error::{ClientError, Result};
use crate::session::Session;
use crate::throttle::SharedOp;

/// Coalescing state for profile writes.
#[derive(Default)]
pub struct ProfileSync {
    /// Props buffered while a save window is open.
    pub(crate) pending: Map<String, Value>,
    /// End of the current save window, if one is open.
    pub(crate) window_deadline: Option<Instant>,
    /// The write scheduled to flush `pending` when the window closes.
    pub(crate) scheduled_flush: Option<SharedOp<Result<User>>>,
}

enum UpdatePath {
    WriteNow(Map<String, Value>),
    JoinScheduled(SharedOp<Result<User>>),
}

impl Session {
    /// Coalesced profile update. Outside a save window the props are
    /// written immediately (merged with anything pending) and a new
    /// window opens; inside one they are buffered and the scheduled
    /// flush's result is returned.
    pub async fn update_user_props(self: &Arc<Self>, props: Map<String, Value>) -> Result<User> {
        let props = strip_to_editable(props);

        let path = {
            let mut profile = self.profile.lock().unwrap();
            let now = Instant::now();
            let in_window = profile.window_deadline.is_some_and(|deadline| now < deadline);

            if in_window {
                profile.pending.extend(props);
                if profile.scheduled_flush.is_none() {
                    let deadline = profile.window_deadline.expect("window is open");
                    let session = Arc::clone(self);
                    let flush = tokio::spawn(async move {
                        tokio::time::sleep_until(deadline).await;
                        session.flush_pending().await
                    });
                    profile.scheduled_flush = Some(
                        async move {
                            match flush.await {
                                Ok(result) => result,
                                Err(e) => Err(ClientError::Internal(format!(
                                    "profile flush task failed: {e}"
                                ))),
                            }
                        }
                        .boxed()
                        .shared(),
                    );
                }
                UpdatePath::JoinScheduled(
                    profile.scheduled_flush.clone().expect("flush just armed"),
                )
            } else {
                let mut merged = std::mem::take(&mut profile.pending);
                merged.extend(props);
                profile.window_deadline = Some(now + self.config.profile_save_delay);
                profile.scheduled_flush = None;
                UpdatePath::WriteNow(merged)
            }
        };

        match path {
            UpdatePath::WriteNow(props) => self.write_user(props).await,
            UpdatePath::JoinScheduled(flush) => flush.await,
        }
    }

    /// Bypass coalescing: drain the pending buffer into `props` and write
    /// now. Resolves without a network call when nothing is dirty. The
    /// send pipeline awaits this before every network send.
    pub async fn immediate_update(self: &Arc<Self>, props: Map<String, Value>) -> Result<User> {
        let merged = {
            let mut profile = self.profile.lock().unwrap();
            let mut merged = std::mem::take(&mut profile.pending);
            merged.extend(strip_to_editable(props));
            merged
        };
        self.write_user(merged).await
    }

    async fn flush_pending(self: Arc<Self>) -> Result<User> {
        let taken = {
            let mut profile = self.profile.lock().unwrap();
            profile.scheduled_flush = None;
            profile.window_deadline = Some(Instant::now() + self.config.profile_save_delay);
            std::mem::take(&mut profile.pending)
        };
        self.write_user(taken).await
    }

    async fn write_user(&self, props: Map<String, Value>) -> Result<User> {
        let props = strip_to_editable(props);
        let (current, user_id) = {
            let state = self.state.lock().unwrap();
            (state.user.clone(), state.user.id.clone())
        };

        if !is_profile_dirty(&current, &props) {
            return Ok(current);
        }
        let user_id = user_id
            .ok_or_else(|| ClientError::Validation("no active user; call login first".into()))?;

        match self.api.update_user(&user_id, &props).await {
            Ok(response) => {
                let user = response.app_user;
                self.state.lock().unwrap().user = user.clone();
                debug!(user = %user_id, "Profile updated");
                Ok(user)
            }
            Err(e) => {
                error!(error = %e, "Profile update failed");
                Err(e)
            }
        }
    }

    /// Record a host-defined event. When the backend reports that the
    /// conversation changed as a result, re-fetch and re-subscribe.
    pub async fn track_event(
        self: &Arc<Self>,
        event_name: &str,
        props: Map<String, Value>,
    ) -> Result<()> {
        let user_id = self.require_user_id()?;
        let response = self.api.track_event(&user_id, event_name, &props).await?;
        if response.conversation_updated {
            self.get_messages().await?;
            self.connect_conversation().await?;
        }
        Ok(())
    }
}
