//! Backend REST API: the [`BackendApi`] seam the synchronizer talks
//! through, plus the reqwest implementation used in production. Tests
//! substitute a mock.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Mutex;

use palaver_shared::{AppInfo, Message, User};

use crate::error::{ClientError, Result};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub device: DeviceInfo,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub platform: String,
    /// Persisted client id, stable across page loads.
    pub id: String,
    pub info: DeviceDetails,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDetails {
    pub sdk_version: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub app_user: User,
    #[serde(default)]
    pub app: AppInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDto {
    #[serde(rename = "_id", default)]
    pub id: Option<String>,
    #[serde(default)]
    pub unread_count: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesResponse {
    #[serde(default)]
    pub conversation: ConversationDto,
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Pagination cursor; `None` means no older history remains.
    #[serde(default)]
    pub previous: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub message: Message,
    #[serde(default)]
    pub conversation: ConversationDto,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserResponse {
    pub app_user: User,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackEventResponse {
    #[serde(default)]
    pub conversation_updated: bool,
}

/// Operations the widget core consumes from the backend.
#[async_trait]
pub trait BackendApi: Send + Sync {
    /// Install (or clear) the bearer token used on subsequent calls.
    fn set_auth(&self, _jwt: Option<String>) {}

    async fn login(&self, request: LoginRequest) -> Result<LoginResponse>;

    /// Latest window of messages, or the window before `before` (epoch
    /// seconds) when paginating.
    async fn get_messages(&self, user_id: &str, before: Option<f64>) -> Result<MessagesResponse>;

    async fn send_message(&self, user_id: &str, message: &Message) -> Result<SendMessageResponse>;

    async fn upload_image(
        &self,
        user_id: &str,
        image: Vec<u8>,
        device_id: &str,
    ) -> Result<SendMessageResponse>;

    async fn update_user(
        &self,
        user_id: &str,
        props: &Map<String, Value>,
    ) -> Result<UpdateUserResponse>;

    async fn track_event(
        &self,
        user_id: &str,
        event_name: &str,
        props: &Map<String, Value>,
    ) -> Result<TrackEventResponse>;

    async fn reset_unread(&self, user_id: &str) -> Result<()>;

    async fn post_postback(&self, user_id: &str, action_id: &str) -> Result<()>;

    /// Billing/account probe; callers treat failures as best-effort.
    async fn get_account(&self) -> Result<Value>;
}

/// reqwest-backed [`BackendApi`].
pub struct RestApi {
    http: reqwest::Client,
    base_url: reqwest::Url,
    app_id: String,
    jwt: Mutex<Option<String>>,
}

impl RestApi {
    pub fn new(base_url: &str, app_id: &str) -> Result<Self> {
        let base_url = reqwest::Url::parse(base_url)
            .map_err(|e| ClientError::Validation(format!("invalid base url: {e}")))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            app_id: app_id.to_string(),
            jwt: Mutex::new(None),
        })
    }

    fn endpoint(&self, path: &str) -> Result<reqwest::Url> {
        self.base_url
            .join(&format!("v1/apps/{}/{}", self.app_id, path))
            .map_err(|e| ClientError::Validation(format!("invalid endpoint path: {e}")))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.jwt.lock().unwrap().as_deref() {
            Some(jwt) => request.bearer_auth(jwt),
            None => request,
        }
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }

        #[derive(Deserialize)]
        struct ErrorBody {
            error: Option<ErrorDetail>,
        }
        #[derive(Deserialize)]
        struct ErrorDetail {
            code: Option<String>,
            message: Option<String>,
        }

        let detail = response
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|body| body.error);
        Err(ClientError::Api {
            status: status.as_u16(),
            code: detail.as_ref().and_then(|d| d.code.clone()),
            message: detail
                .and_then(|d| d.message)
                .unwrap_or_else(|| status.to_string()),
        })
    }

    async fn check(response: reqwest::Response) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Self::decode::<Value>(response).await.map(|_| ())
    }
}

#[async_trait]
impl BackendApi for RestApi {
    fn set_auth(&self, jwt: Option<String>) {
        *self.jwt.lock().unwrap() = jwt;
    }

    async fn login(&self, request: LoginRequest) -> Result<LoginResponse> {
        let url = self.endpoint("appusers")?;
        let response = self.authorize(self.http.post(url)).json(&request).send().await?;
        Self::decode(response).await
    }

    async fn get_messages(&self, user_id: &str, before: Option<f64>) -> Result<MessagesResponse> {
        let mut url = self.endpoint(&format!("appusers/{user_id}/messages"))?;
        if let Some(before) = before {
            url.query_pairs_mut().append_pair("before", &before.to_string());
        }
        let response = self.authorize(self.http.get(url)).send().await?;
        Self::decode(response).await
    }

    async fn send_message(&self, user_id: &str, message: &Message) -> Result<SendMessageResponse> {
        let url = self.endpoint(&format!("appusers/{user_id}/messages"))?;
        let response = self.authorize(self.http.post(url)).json(message).send().await?;
        Self::decode(response).await
    }

    async fn upload_image(
        &self,
        user_id: &str,
        image: Vec<u8>,
        device_id: &str,
    ) -> Result<SendMessageResponse> {
        let url = self.endpoint(&format!("appusers/{user_id}/images"))?;
        let part = reqwest::multipart::Part::bytes(image)
            .file_name("image.jpg")
            .mime_str("image/jpeg")?;
        let form = reqwest::multipart::Form::new()
            .part("source", part)
            .text("role", "appUser")
            .text("deviceId", device_id.to_string());
        let response = self.authorize(self.http.post(url)).multipart(form).send().await?;
        Self::decode(response).await
    }

    async fn update_user(
        &self,
        user_id: &str,
        props: &Map<String, Value>,
    ) -> Result<UpdateUserResponse> {
        let url = self.endpoint(&format!("appusers/{user_id}"))?;
        let response = self.authorize(self.http.put(url)).json(props).send().await?;
        Self::decode(response).await
    }

    async fn track_event(
        &self,
        user_id: &str,
        event_name: &str,
        props: &Map<String, Value>,
    ) -> Result<TrackEventResponse> {
        let url = self.endpoint(&format!("appusers/{user_id}/events"))?;
        let body = serde_json::json!({ "name": event_name, "props": props });
        let response = self.authorize(self.http.post(url)).json(&body).send().await?;
        Self::decode(response).await
    }

    async fn reset_unread(&self, user_id: &str) -> Result<()> {
        let url = self.endpoint(&format!("appusers/{user_id}/conversation/read"))?;
        let response = self.authorize(self.http.post(url)).send().await?;
        Self::check(response).await
    }

    async fn post_postback(&self, user_id: &str, action_id: &str) -> Result<()> {
        let url = self.endpoint(&format!("appusers/{user_id}/conversation/postback"))?;
        let body = serde_json::json!({ "actionId": action_id });
        let response = self.authorize(self.http.post(url)).json(&body).send().await?;
        Self::check(response).await
    }

    async fn get_account(&self) -> Result<Value> {
        let url = self.endpoint("account")?;
        let response = self.authorize(self.http.get(url)).send().await?;
        Self::decode(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_are_rooted_under_the_app() {
        let api = RestApi::new("https://api.example.com/", "app-1").unwrap();
        assert_eq!(
            api.endpoint("appusers/u1/messages").unwrap().as_str(),
            "https://api.example.com/v1/apps/app-1/appusers/u1/messages"
        );
    }

    #[test]
    fn new_rejects_bad_urls() {
        assert!(RestApi::new("nope", "app-1").is_err());
    }

    #[test]
    fn messages_response_tolerates_missing_fields() {
        let response: MessagesResponse = serde_json::from_str("{}").unwrap();
        assert!(response.messages.is_empty());
        assert!(response.previous.is_none());
        assert!(response.conversation.id.is_none());
    }
}
