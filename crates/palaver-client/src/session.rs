//! The session context: everything that was module-global state in a
//! browser SDK lives here, constructed by the façade on init and torn
//! down on destroy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc;

use palaver_shared::types::new_client_id;
use palaver_shared::{AppInfo, User};
use palaver_store::{ConversationCommand, ConversationState, KvStore};

use crate::api::{BackendApi, MessagesResponse};
use crate::config::Config;
use crate::error::{ClientError, Result};
use crate::events::EventEmitter;
use crate::geo::Geolocator;
use crate::pubsub::{ChannelEvent, PubSubTransport, Subscription};
use crate::throttle::Throttle;
use crate::user::ProfileSync;

/// Storage keys, namespaced by app id inside [`KvStore`].
pub(crate) mod keys {
    pub const CLIENT_ID: &str = "clientId";
    pub const APP_USER_ID: &str = "appUserId";
    pub const SESSION_TOKEN: &str = "sessionToken";
}

/// Mutable session state. Held behind a std mutex and never locked across
/// an await point; mutation order is lock acquisition order.
#[derive(Default)]
pub struct SessionState {
    pub user: User,
    pub app: Option<AppInfo>,
    /// Best-effort billing info, populated at login when available.
    pub account: Option<Value>,
    pub conversation: ConversationState,
    pub(crate) conversation_sub: Option<(Subscription, Subscription)>,
    pub(crate) user_sub: Option<Subscription>,
    pub widget_opened: bool,
}

/// One widget session: configuration, collaborators, and exclusive
/// ownership of conversation and user state.
pub struct Session {
    pub config: Config,
    pub(crate) api: Arc<dyn BackendApi>,
    pub(crate) transport: Arc<dyn PubSubTransport>,
    pub(crate) geolocator: Arc<dyn Geolocator>,
    pub(crate) storage: KvStore,
    pub(crate) emitter: EventEmitter,
    /// Persisted client/device id, stable across sessions.
    pub(crate) device_id: String,
    pub(crate) state: Mutex<SessionState>,
    /// Coalesces concurrent conversation fetches per user id.
    pub(crate) fetch_throttle: Throttle<String, Result<MessagesResponse>>,
    pub(crate) profile: Mutex<ProfileSync>,
    pub(crate) channel_tx: mpsc::Sender<ChannelEvent>,
    /// Taken once when the façade spawns the event loop.
    pub(crate) channel_rx: Mutex<Option<mpsc::Receiver<ChannelEvent>>>,
    pub(crate) destroyed: AtomicBool,
}

impl Session {
    pub fn new(
        config: Config,
        api: Arc<dyn BackendApi>,
        transport: Arc<dyn PubSubTransport>,
        geolocator: Arc<dyn Geolocator>,
        storage: KvStore,
    ) -> Arc<Self> {
        let device_id = match storage.get(keys::CLIENT_ID) {
            Some(id) => id,
            None => {
                let id = new_client_id();
                storage.set(keys::CLIENT_ID, &id);
                id
            }
        };

        let (channel_tx, channel_rx) = mpsc::channel(128);

        Arc::new(Self {
            config,
            api,
            transport,
            geolocator,
            storage,
            emitter: EventEmitter::new(),
            device_id,
            state: Mutex::new(SessionState::default()),
            fetch_throttle: Throttle::new(),
            profile: Mutex::new(ProfileSync::default()),
            channel_tx,
            channel_rx: Mutex::new(Some(channel_rx)),
            destroyed: AtomicBool::new(false),
        })
    }

    pub(crate) fn ensure_alive(&self) -> Result<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(ClientError::Destroyed);
        }
        Ok(())
    }

    pub(crate) fn user_id(&self) -> Option<String> {
        self.state.lock().unwrap().user.id.clone()
    }

    pub(crate) fn require_user_id(&self) -> Result<String> {
        self.user_id()
            .ok_or_else(|| ClientError::Validation("no active user; call login first".into()))
    }

    pub(crate) fn apply(&self, command: ConversationCommand) {
        self.state.lock().unwrap().conversation.apply(command);
    }

    pub fn conversation_snapshot(&self) -> ConversationState {
        self.state.lock().unwrap().conversation.clone()
    }

    pub fn user_snapshot(&self) -> User {
        self.state.lock().unwrap().user.clone()
    }
}
