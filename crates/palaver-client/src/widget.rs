//! The widget façade: the lifecycle surface consumed by the embedding
//! host. Owns the session context and the inbound event loop.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use palaver_shared::constants::DEVICE_PLATFORM;
use palaver_shared::user::strip_to_editable;
use palaver_shared::{Message, User};
use palaver_store::{ConversationCommand, ConversationState, KvStore};

use crate::api::{BackendApi, DeviceDetails, DeviceInfo, LoginRequest, MessagesResponse};
use crate::config::Config;
use crate::conversation::MessagePayload;
use crate::error::Result;
use crate::events::WidgetEvent;
use crate::geo::{Geolocator, NoGeolocator};
use crate::pubsub::PubSubTransport;
use crate::session::{keys, Session};
use crate::user::ProfileSync;

/// External collaborators injected into the widget.
pub struct WidgetDeps {
    pub api: Arc<dyn BackendApi>,
    pub transport: Arc<dyn PubSubTransport>,
    pub geolocator: Arc<dyn Geolocator>,
    /// Defaults to the platform key/value store when `None`.
    pub storage: Option<KvStore>,
}

impl WidgetDeps {
    pub fn new(api: Arc<dyn BackendApi>, transport: Arc<dyn PubSubTransport>) -> Self {
        Self {
            api,
            transport,
            geolocator: Arc::new(NoGeolocator),
            storage: None,
        }
    }

    pub fn with_geolocator(mut self, geolocator: Arc<dyn Geolocator>) -> Self {
        self.geolocator = geolocator;
        self
    }

    pub fn with_storage(mut self, storage: KvStore) -> Self {
        self.storage = Some(storage);
        self
    }
}

pub struct Widget {
    pub(crate) session: Arc<Session>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl Widget {
    /// Construct the session context. Fails fast, before any network
    /// call, on a missing app id or an unparseable base URL.
    pub fn init(config: Config, deps: WidgetDeps) -> Result<Self> {
        config.validate()?;
        let storage = deps
            .storage
            .unwrap_or_else(|| KvStore::open(&config.app_id));
        let session = Session::new(config, deps.api, deps.transport, deps.geolocator, storage);
        info!(app = %session.config.app_id, "Widget initialised");
        Ok(Self {
            session,
            event_loop: Mutex::new(None),
        })
    }

    fn ensure_event_loop(&self) {
        let mut guard = self.event_loop.lock().unwrap();
        if guard.is_some() {
            return;
        }
        if let Some(events) = self.session.channel_rx.lock().unwrap().take() {
            let session = Arc::clone(&self.session);
            *guard = Some(tokio::spawn(session.run_channel_events(events)));
        }
    }

    pub async fn login(&self, user_id: Option<&str>, jwt: Option<&str>) -> Result<User> {
        self.login_with(user_id, jwt, Map::new()).await
    }

    /// Authenticate (or start an anonymous session) and bring the widget
    /// to a ready state: reset local state, log in, sync attributes,
    /// fetch the conversation when one was started, and subscribe the
    /// user channel.
    pub async fn login_with(
        &self,
        user_id: Option<&str>,
        jwt: Option<&str>,
        attributes: Map<String, Value>,
    ) -> Result<User> {
        let session = &self.session;
        session.ensure_alive()?;
        self.ensure_event_loop();

        // drop any previous authenticated state
        session.disconnect_pubsub();
        {
            let mut state = session.state.lock().unwrap();
            state.user = User::default();
            state.app = None;
            state.account = None;
            state.conversation.apply(ConversationCommand::Reset);
        }
        *session.profile.lock().unwrap() = ProfileSync::default();
        session.api.set_auth(jwt.map(String::from));

        let attributes = strip_to_editable(attributes);
        // anonymous sessions resume the persisted server user
        let known_user = user_id.map(String::from).or_else(|| {
            if jwt.is_none() {
                session.storage.get(keys::APP_USER_ID)
            } else {
                None
            }
        });

        let request = LoginRequest {
            user_id: known_user,
            device: DeviceInfo {
                platform: DEVICE_PLATFORM.into(),
                id: session.device_id.clone(),
                info: DeviceDetails {
                    sdk_version: env!("CARGO_PKG_VERSION").into(),
                },
            },
        };

        let response = match session.api.login(request).await {
            Ok(response) => response,
            Err(e) => {
                if e.is_auth_error(&session.config.auth_error_codes) {
                    warn!("Login rejected; clearing stored session credentials");
                    session.storage.remove(keys::APP_USER_ID);
                    session.storage.remove(keys::SESSION_TOKEN);
                }
                return Err(e);
            }
        };

        let has_billing = response
            .app
            .integrations
            .iter()
            .any(|i| i.kind == "stripeConnect");
        if let Some(id) = &response.app_user.id {
            session.storage.set(keys::APP_USER_ID, id);
        }
        {
            let mut state = session.state.lock().unwrap();
            state.user = response.app_user;
            state.app = Some(response.app);
        }

        if has_billing {
            // best effort; never blocks login
            match session.api.get_account().await {
                Ok(account) => session.state.lock().unwrap().account = Some(account),
                Err(e) => debug!(error = %e, "Account info fetch failed"),
            }
        }

        session.immediate_update(attributes).await?;

        let conversation_started = session.state.lock().unwrap().user.conversation_started;
        if conversation_started {
            session.handle_conversation_updated().await?;
        }
        session.connect_user().await?;

        let user = session.user_snapshot();
        info!(
            user = user.id.as_deref().unwrap_or("anonymous"),
            "Login complete"
        );
        session.emitter.emit(WidgetEvent::Ready { user: user.clone() });
        Ok(user)
    }

    /// Drop the authenticated session and start over anonymously.
    pub async fn logout(&self) -> Result<User> {
        self.session.ensure_alive()?;
        self.session.storage.remove(keys::APP_USER_ID);
        self.session.storage.remove(keys::SESSION_TOKEN);
        self.login(None, None).await
    }

    pub async fn send_message(&self, payload: MessagePayload) -> Result<Message> {
        self.session.ensure_alive()?;
        self.session.send_message(payload).await
    }

    pub async fn resend_message(&self, client_id: &str) -> Result<Option<Message>> {
        self.session.ensure_alive()?;
        self.session.resend_message(client_id).await
    }

    pub async fn upload_image(&self, mime_type: &str, bytes: Vec<u8>) -> Result<Option<Message>> {
        self.session.ensure_alive()?;
        self.session.upload_image(mime_type, bytes).await
    }

    pub async fn update_user(&self, props: Map<String, Value>) -> Result<User> {
        self.session.ensure_alive()?;
        let user = self.session.update_user_props(props).await?;
        if user.conversation_started {
            self.session.handle_conversation_updated().await?;
        }
        Ok(user)
    }

    pub async fn track_event(&self, event_name: &str, props: Map<String, Value>) -> Result<()> {
        self.session.ensure_alive()?;
        self.session.track_event(event_name, props).await
    }

    /// Fetch (or refresh) the conversation and return a snapshot. Marks
    /// the conversation as started so subsequent sends target it.
    pub async fn get_conversation(&self) -> Result<ConversationState> {
        self.session.ensure_alive()?;
        self.session.handle_conversation_updated().await?;
        let mut state = self.session.state.lock().unwrap();
        state.user.conversation_started = true;
        Ok(state.conversation.clone())
    }

    pub async fn fetch_more_messages(&self) -> Result<Option<MessagesResponse>> {
        self.session.ensure_alive()?;
        self.session.fetch_more_messages().await
    }

    pub async fn reset_unread_count(&self) -> Result<()> {
        self.session.ensure_alive()?;
        self.session.reset_unread_count().await
    }

    pub async fn post_postback(&self, action_id: &str) -> Result<()> {
        self.session.ensure_alive()?;
        self.session.post_postback(action_id).await
    }

    pub fn get_user(&self) -> User {
        self.session.user_snapshot()
    }

    pub fn get_conversation_snapshot(&self) -> ConversationState {
        self.session.conversation_snapshot()
    }

    /// Subscribe to widget events (`ready`, `message`, `unreadCount`, …).
    pub fn events(&self) -> tokio::sync::broadcast::Receiver<WidgetEvent> {
        self.session.emitter.subscribe()
    }

    pub fn open(&self) {
        self.session.state.lock().unwrap().widget_opened = true;
    }

    pub fn close(&self) {
        self.session.state.lock().unwrap().widget_opened = false;
    }

    pub fn is_opened(&self) -> bool {
        self.session.state.lock().unwrap().widget_opened
    }

    /// Tear the session down: stop the event loop, cancel subscriptions,
    /// and poison further use. Idempotent.
    pub fn destroy(&self) {
        if self.session.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.event_loop.lock().unwrap().take() {
            handle.abort();
        }
        self.session.disconnect_pubsub();
        self.session.emitter.emit(WidgetEvent::Destroy);
        info!("Widget destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use crate::testing::{widget_harness, MockApi};
    use palaver_shared::Integration;
    use serde_json::json;

    #[test]
    fn init_fails_fast_without_app_id() {
        let api = Arc::new(MockApi::default());
        let transport = Arc::new(crate::testing::MockTransport::default());
        let deps = WidgetDeps::new(api.clone(), transport).with_storage(KvStore::in_memory(""));
        let result = Widget::init(Config::new("", "https://api.example.com"), deps);
        assert!(matches!(result, Err(ClientError::Validation(_))));
        assert!(api.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn login_brings_the_widget_ready() {
        let (api, transport, widget) = widget_harness();
        let mut events = widget.events();

        let user = widget.login(Some("host-user"), None).await.unwrap();
        assert_eq!(user.id.as_deref(), Some("u1"));

        // persisted continuity key
        assert_eq!(
            widget.session.storage.get(keys::APP_USER_ID).as_deref(),
            Some("u1")
        );

        // user channel subscribed
        assert_eq!(
            transport.subscriptions.lock().unwrap().clone(),
            vec!["/v1/appusers/u1".to_string()]
        );

        // no conversation yet, so no fetch happened
        let calls = api.calls.lock().unwrap().clone();
        assert!(!calls.iter().any(|c| c.starts_with("get_messages")));

        match events.recv().await.unwrap() {
            WidgetEvent::Ready { user } => assert_eq!(user.id.as_deref(), Some("u1")),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn login_fetches_history_for_started_conversations() {
        let (api, transport, widget) = widget_harness();
        api.user_template.lock().unwrap().conversation_started = true;

        widget.login(Some("host-user"), None).await.unwrap();

        let calls = api.calls.lock().unwrap().clone();
        assert!(calls.iter().any(|c| c.starts_with("get_messages")));
        // conversation message + activity channels, then the user channel
        assert_eq!(transport.subscriptions.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn login_applies_initial_attributes() {
        let (api, _transport, widget) = widget_harness();

        let mut attributes = Map::new();
        attributes.insert("email".into(), json!("ada@x.com"));
        attributes.insert("notEditable".into(), json!(true));
        widget
            .login_with(Some("host-user"), None, attributes)
            .await
            .unwrap();

        let payloads = api.update_payloads.lock().unwrap().clone();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0]["email"], json!("ada@x.com"));
        assert!(payloads[0].get("notEditable").is_none());
    }

    #[tokio::test]
    async fn auth_failure_clears_stored_credentials() {
        let (api, _transport, widget) = widget_harness();
        widget.session.storage.set(keys::APP_USER_ID, "stale");
        widget.session.storage.set(keys::SESSION_TOKEN, "stale-token");
        *api.login_error.lock().unwrap() = Some(ClientError::Api {
            status: 401,
            code: Some("invalid_auth".into()),
            message: "bad jwt".into(),
        });

        let result = widget.login(Some("host-user"), Some("expired-jwt")).await;
        assert!(result.is_err());
        assert!(widget.session.storage.get(keys::APP_USER_ID).is_none());
        assert!(widget.session.storage.get(keys::SESSION_TOKEN).is_none());
    }

    #[tokio::test]
    async fn non_auth_failure_keeps_stored_credentials() {
        let (api, _transport, widget) = widget_harness();
        widget.session.storage.set(keys::APP_USER_ID, "kept");
        *api.login_error.lock().unwrap() =
            Some(ClientError::Network("connection refused".into()));

        assert!(widget.login(None, None).await.is_err());
        assert_eq!(
            widget.session.storage.get(keys::APP_USER_ID).as_deref(),
            Some("kept")
        );
    }

    #[tokio::test]
    async fn anonymous_login_resumes_persisted_user() {
        let (api, _transport, widget) = widget_harness();
        widget.session.storage.set(keys::APP_USER_ID, "u-prev");

        widget.login(None, None).await.unwrap();

        let calls = api.calls.lock().unwrap().clone();
        assert!(calls.iter().any(|c| c == "login user=Some(\"u-prev\")"));
    }

    #[tokio::test]
    async fn logout_clears_continuity_and_relogs_anonymously() {
        let (api, _transport, widget) = widget_harness();
        widget.login(Some("host-user"), None).await.unwrap();
        assert!(widget.session.storage.get(keys::APP_USER_ID).is_some());

        widget.logout().await.unwrap();

        let calls = api.calls.lock().unwrap().clone();
        assert!(calls.iter().any(|c| c == "login user=None"));
    }

    #[tokio::test]
    async fn billing_probe_is_best_effort() {
        let (api, _transport, widget) = widget_harness();
        api.app.lock().unwrap().integrations = vec![Integration {
            kind: "stripeConnect".into(),
        }];
        api.fail_account(true);

        // login still succeeds
        widget.login(Some("host-user"), None).await.unwrap();
        assert!(widget.session.state.lock().unwrap().account.is_none());

        let calls = api.calls.lock().unwrap().clone();
        assert!(calls.iter().any(|c| c == "get_account"));
    }

    #[tokio::test]
    async fn get_conversation_marks_started() {
        let (_api, _transport, widget) = widget_harness();
        widget.login(Some("host-user"), None).await.unwrap();

        let conversation = widget.get_conversation().await.unwrap();
        assert_eq!(conversation.conversation_id.as_deref(), Some("conv-1"));
        assert!(widget.get_user().conversation_started);
    }

    #[tokio::test]
    async fn open_close_flags() {
        let (_api, _transport, widget) = widget_harness();
        assert!(!widget.is_opened());
        widget.open();
        assert!(widget.is_opened());
        widget.close();
        assert!(!widget.is_opened());
    }

    #[tokio::test]
    async fn destroy_poisons_the_widget() {
        let (_api, transport, widget) = widget_harness();
        widget.login(Some("host-user"), None).await.unwrap();
        let mut events = widget.events();

        widget.destroy();
        widget.destroy(); // idempotent

        assert!(transport.disconnects.load(Ordering::SeqCst) >= 1);
        assert!(matches!(
            widget.login(None, None).await,
            Err(ClientError::Destroyed)
        ));
        assert!(matches!(
            widget
                .send_message(MessagePayload::Text("hi".into()))
                .await,
            Err(ClientError::Destroyed)
        ));

        loop {
            match events.recv().await.unwrap() {
                WidgetEvent::Destroy => break,
                _ => continue,
            }
        }
    }
}
