//! Shared test doubles: mock backend, transport, and geolocator, plus
//! session/widget builders.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;

use palaver_shared::types::{MessageKind, Role};
use palaver_shared::{AppInfo, Message, User};
use palaver_store::{ConversationCommand, ConversationUpdate, KvStore};

use crate::api::{
    BackendApi, ConversationDto, LoginRequest, LoginResponse, MessagesResponse,
    SendMessageResponse, TrackEventResponse, UpdateUserResponse,
};
use crate::config::Config;
use crate::error::{ClientError, Result};
use crate::geo::{GeoError, Geolocator, Position};
use crate::pubsub::{ChannelEvent, PubSubTransport, Subscription};
use crate::session::Session;
use crate::widget::{Widget, WidgetDeps};

pub(crate) fn confirmed_message(id: &str, received: f64) -> Message {
    Message {
        id: Some(id.into()),
        client_id: None,
        client_sent: None,
        kind: MessageKind::Text,
        role: Role::AppUser,
        text: Some(format!("msg {id}")),
        media_url: None,
        media_type: None,
        coordinates: None,
        received: Some(received),
        send_status: None,
        device_id: None,
    }
}

pub(crate) fn test_user() -> User {
    User {
        id: Some("u1".into()),
        ..User::default()
    }
}

pub(crate) struct MockApi {
    pub calls: Mutex<Vec<String>>,
    pub update_payloads: Mutex<Vec<Map<String, Value>>>,
    pub messages: Mutex<Vec<Message>>,
    pub previous: Mutex<Option<String>>,
    pub last_sent: Mutex<Option<Message>>,
    pub user_template: Mutex<User>,
    pub app: Mutex<AppInfo>,
    pub login_error: Mutex<Option<ClientError>>,
    pub conversation_updated_on_track: AtomicBool,
    fail_sends: AtomicBool,
    fail_fetches: AtomicBool,
    fail_account: AtomicBool,
    latency: Mutex<Option<Duration>>,
    send_counter: AtomicUsize,
}

impl Default for MockApi {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            update_payloads: Mutex::new(Vec::new()),
            messages: Mutex::new(Vec::new()),
            previous: Mutex::new(None),
            last_sent: Mutex::new(None),
            user_template: Mutex::new(test_user()),
            app: Mutex::new(AppInfo::default()),
            login_error: Mutex::new(None),
            conversation_updated_on_track: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
            fail_fetches: AtomicBool::new(false),
            fail_account: AtomicBool::new(false),
            latency: Mutex::new(None),
            send_counter: AtomicUsize::new(0),
        }
    }
}

impl MockApi {
    pub fn fail_sends(&self, value: bool) {
        self.fail_sends.store(value, Ordering::SeqCst);
    }

    pub fn fail_fetches(&self, value: bool) {
        self.fail_fetches.store(value, Ordering::SeqCst);
    }

    pub fn fail_account(&self, value: bool) {
        self.fail_account.store(value, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    async fn delay(&self) {
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn confirm(&self, message: &Message) -> SendMessageResponse {
        let n = self.send_counter.fetch_add(1, Ordering::SeqCst) + 1;
        SendMessageResponse {
            message: Message {
                id: Some(format!("srv-{n}")),
                client_id: None,
                client_sent: None,
                kind: message.kind,
                role: message.role,
                text: message.text.clone(),
                media_url: message.media_url.clone(),
                media_type: message.media_type.clone(),
                coordinates: message.coordinates,
                received: Some(1000.0 + n as f64),
                send_status: None,
                device_id: message.device_id.clone(),
            },
            conversation: ConversationDto {
                id: Some("conv-1".into()),
                unread_count: None,
            },
        }
    }
}

fn apply_props(user: &mut User, props: &Map<String, Value>) {
    for (key, value) in props {
        match key.as_str() {
            "givenName" => user.given_name = value.as_str().map(String::from),
            "surname" => user.surname = value.as_str().map(String::from),
            "email" => user.email = value.as_str().map(String::from),
            "signedUpAt" => user.signed_up_at = value.as_str().map(String::from),
            "properties" => {
                user.properties = value.as_object().cloned().unwrap_or_default();
            }
            _ => {}
        }
    }
}

#[async_trait]
impl BackendApi for MockApi {
    async fn login(&self, request: LoginRequest) -> Result<LoginResponse> {
        self.record(format!("login user={:?}", request.user_id));
        if let Some(error) = self.login_error.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(LoginResponse {
            app_user: self.user_template.lock().unwrap().clone(),
            app: self.app.lock().unwrap().clone(),
        })
    }

    async fn get_messages(&self, _user_id: &str, before: Option<f64>) -> Result<MessagesResponse> {
        self.delay().await;
        self.record(format!(
            "get_messages before={}",
            before.map(|b| b.to_string()).unwrap_or_else(|| "none".into())
        ));
        if self.fail_fetches.load(Ordering::SeqCst) {
            return Err(ClientError::Network("offline".into()));
        }
        Ok(MessagesResponse {
            conversation: ConversationDto {
                id: Some("conv-1".into()),
                unread_count: None,
            },
            messages: self.messages.lock().unwrap().clone(),
            previous: self.previous.lock().unwrap().clone(),
        })
    }

    async fn send_message(&self, _user_id: &str, message: &Message) -> Result<SendMessageResponse> {
        self.delay().await;
        self.record("send_message");
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ClientError::Network("offline".into()));
        }
        *self.last_sent.lock().unwrap() = Some(message.clone());
        Ok(self.confirm(message))
    }

    async fn upload_image(
        &self,
        _user_id: &str,
        _image: Vec<u8>,
        device_id: &str,
    ) -> Result<SendMessageResponse> {
        self.record("upload_image");
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ClientError::Network("offline".into()));
        }
        let template = Message {
            media_url: Some("https://media.example.com/image.jpg".into()),
            media_type: Some("image/jpeg".into()),
            device_id: Some(device_id.into()),
            ..Message::new_outgoing(MessageKind::Image)
        };
        Ok(self.confirm(&template))
    }

    async fn update_user(
        &self,
        _user_id: &str,
        props: &Map<String, Value>,
    ) -> Result<UpdateUserResponse> {
        self.record("update_user");
        self.update_payloads.lock().unwrap().push(props.clone());
        let mut user = self.user_template.lock().unwrap().clone();
        apply_props(&mut user, props);
        Ok(UpdateUserResponse { app_user: user })
    }

    async fn track_event(
        &self,
        _user_id: &str,
        event_name: &str,
        _props: &Map<String, Value>,
    ) -> Result<TrackEventResponse> {
        self.record(format!("track_event {event_name}"));
        Ok(TrackEventResponse {
            conversation_updated: self.conversation_updated_on_track.load(Ordering::SeqCst),
        })
    }

    async fn reset_unread(&self, _user_id: &str) -> Result<()> {
        self.record("reset_unread");
        Ok(())
    }

    async fn post_postback(&self, _user_id: &str, action_id: &str) -> Result<()> {
        self.record(format!("post_postback {action_id}"));
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ClientError::Network("offline".into()));
        }
        Ok(())
    }

    async fn get_account(&self) -> Result<Value> {
        self.record("get_account");
        if self.fail_account.load(Ordering::SeqCst) {
            return Err(ClientError::Network("billing unavailable".into()));
        }
        Ok(json!({ "company": "ACME" }))
    }
}

#[derive(Default)]
pub(crate) struct MockTransport {
    pub subscriptions: Mutex<Vec<String>>,
    pub cancelled: Arc<Mutex<Vec<String>>>,
    pub sinks: Mutex<Vec<(String, mpsc::Sender<ChannelEvent>)>>,
    pub disconnects: AtomicUsize,
    fail: AtomicBool,
}

impl MockTransport {
    pub fn fail_subscribes(&self, value: bool) {
        self.fail.store(value, Ordering::SeqCst);
    }
}

#[async_trait]
impl PubSubTransport for MockTransport {
    async fn subscribe(
        &self,
        channel: &str,
        sink: mpsc::Sender<ChannelEvent>,
    ) -> Result<Subscription> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ClientError::Subscription(format!("refused: {channel}")));
        }
        self.subscriptions.lock().unwrap().push(channel.to_string());
        self.sinks.lock().unwrap().push((channel.to_string(), sink));

        let cancelled = Arc::clone(&self.cancelled);
        let name = channel.to_string();
        Ok(Subscription::new(
            channel,
            Box::new(move || {
                cancelled.lock().unwrap().push(name);
            }),
        ))
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

pub(crate) enum GeoBehavior {
    Position(palaver_shared::types::Coordinates),
    PositionAfter(Duration, palaver_shared::types::Coordinates),
    Fail(GeoError),
    Never,
}

pub(crate) struct MockGeolocator {
    pub behavior: GeoBehavior,
}

#[async_trait]
impl Geolocator for MockGeolocator {
    async fn current_position(&self) -> std::result::Result<Position, GeoError> {
        match &self.behavior {
            GeoBehavior::Position(coords) => Ok(Position { coords: *coords }),
            GeoBehavior::PositionAfter(delay, coords) => {
                tokio::time::sleep(*delay).await;
                Ok(Position { coords: *coords })
            }
            GeoBehavior::Fail(error) => Err(error.clone()),
            GeoBehavior::Never => futures::future::pending().await,
        }
    }
}

pub(crate) struct TestHarness {
    pub api: Arc<MockApi>,
    pub transport: Arc<MockTransport>,
    pub session: Arc<Session>,
}

pub(crate) fn harness() -> TestHarness {
    harness_with(MockApi::default(), GeoBehavior::Never)
}

pub(crate) fn harness_with(api: MockApi, geo: GeoBehavior) -> TestHarness {
    let api = Arc::new(api);
    let transport = Arc::new(MockTransport::default());
    let session = Session::new(
        Config::new("app-1", "https://api.example.com"),
        api.clone(),
        transport.clone(),
        Arc::new(MockGeolocator { behavior: geo }),
        KvStore::in_memory("app-1"),
    );
    TestHarness {
        api,
        transport,
        session,
    }
}

pub(crate) fn logged_in(session: &Arc<Session>) {
    session.state.lock().unwrap().user = test_user();
}

pub(crate) fn logged_in_with_conversation(session: &Arc<Session>, conversation_id: &str) {
    let mut state = session.state.lock().unwrap();
    state.user = test_user();
    state
        .conversation
        .apply(ConversationCommand::SetConversation(ConversationUpdate {
            conversation_id: Some(conversation_id.into()),
            ..ConversationUpdate::default()
        }));
}

pub(crate) fn widget_harness() -> (Arc<MockApi>, Arc<MockTransport>, Widget) {
    let api = Arc::new(MockApi::default());
    let transport = Arc::new(MockTransport::default());
    let deps = WidgetDeps::new(api.clone(), transport.clone())
        .with_geolocator(Arc::new(MockGeolocator {
            behavior: GeoBehavior::Never,
        }))
        .with_storage(KvStore::in_memory("app-1"));
    let widget = Widget::init(Config::new("app-1", "https://api.example.com"), deps)
        .expect("valid test config");
    (api, transport, widget)
}
