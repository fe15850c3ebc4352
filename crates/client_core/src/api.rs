use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Serialize};
use shared::{
    domain::{
        ChannelId, ChannelSummary, ChatMessage, Member, MessageId, ServerId, ServerSummary,
        UserId, UserProfile, VoiceParticipant,
    },
    error::ApiError,
    protocol::{
        AuthSession, CreateChannelRequest, CreateRoleRequest, CreateServerRequest, Credentials,
        InstanceInfo, MemberPatch, RoleSummary, SendMessageRequest, VoiceStateRequest,
    },
};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{ClientError, Result};

/// Fired whenever any request on any host comes back 401, so the owner can
/// force a logout without the caller that happened to observe it caring.
pub type UnauthorizedHook = Arc<dyn Fn() + Send + Sync>;

/// The bearer token shared by every request client of a registry. Swapping
/// it is one write; clients read it per request.
pub type CredentialCell = Arc<RwLock<Option<String>>>;

/// Request/response side of one host. Implemented over REST by
/// [`HttpRequestClient`]; reconcilers and the registry depend only on this
/// trait.
#[async_trait]
pub trait RequestClient: Send + Sync {
    fn base_url(&self) -> &str;

    async fn instance_info(&self) -> Result<InstanceInfo>;
    async fn register(&self, credentials: &Credentials) -> Result<AuthSession>;
    async fn login(&self, credentials: &Credentials) -> Result<AuthSession>;

    async fn list_servers(&self) -> Result<Vec<ServerSummary>>;
    async fn create_server(&self, request: &CreateServerRequest) -> Result<ServerSummary>;
    async fn join_server(&self, server_id: ServerId) -> Result<()>;

    async fn list_channels(&self, server_id: ServerId) -> Result<Vec<ChannelSummary>>;
    async fn create_channel(
        &self,
        server_id: ServerId,
        request: &CreateChannelRequest,
    ) -> Result<ChannelSummary>;

    async fn list_roles(&self, server_id: ServerId) -> Result<Vec<RoleSummary>>;
    async fn create_role(
        &self,
        server_id: ServerId,
        request: &CreateRoleRequest,
    ) -> Result<RoleSummary>;

    /// Newest-first page of messages, optionally older than `before`.
    async fn list_messages(
        &self,
        channel_id: ChannelId,
        limit: u32,
        before: Option<MessageId>,
    ) -> Result<Vec<ChatMessage>>;
    async fn send_message(
        &self,
        channel_id: ChannelId,
        request: &SendMessageRequest,
    ) -> Result<ChatMessage>;
    async fn delete_message(&self, channel_id: ChannelId, message_id: MessageId) -> Result<()>;

    async fn list_members(&self, server_id: ServerId) -> Result<Vec<Member>>;
    async fn fetch_member(&self, server_id: ServerId, user_id: UserId) -> Result<Member>;
    async fn update_member(
        &self,
        server_id: ServerId,
        user_id: UserId,
        patch: &MemberPatch,
    ) -> Result<Member>;

    async fn list_voice_participants(&self, channel_id: ChannelId)
        -> Result<Vec<VoiceParticipant>>;
    async fn update_voice_state(
        &self,
        channel_id: ChannelId,
        request: &VoiceStateRequest,
    ) -> Result<()>;

    async fn upload_avatar(&self, bytes: Vec<u8>, content_type: &str) -> Result<UserProfile>;
}

#[derive(Serialize)]
struct ListMessagesQuery {
    limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    before: Option<i64>,
}

#[derive(Clone)]
pub struct HttpRequestClient {
    http: reqwest::Client,
    base_url: String,
    credential: CredentialCell,
    on_unauthorized: Option<UnauthorizedHook>,
}

impl HttpRequestClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        credential: CredentialCell,
        on_unauthorized: Option<UnauthorizedHook>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            credential,
            on_unauthorized,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Attaches the current credential, sends, and maps every non-2xx into a
    /// `ClientError` (preferring the structured body when the host sent one).
    async fn dispatch(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let request = match self.credential.read().await.as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = request
            .send()
            .await
            .map_err(|err| ClientError::Unreachable(err.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED {
            debug!(base_url = %self.base_url, "request client: credential rejected");
            if let Some(hook) = &self.on_unauthorized {
                hook();
            }
        }
        match response.json::<ApiError>().await {
            Ok(body) => Err(body.into()),
            Err(_) => Err(ClientError::from_status(status)),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.dispatch(self.http.get(self.endpoint(path))).await?;
        parse(response).await
    }

    async fn post_json<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let response = self
            .dispatch(self.http.post(self.endpoint(path)).json(body))
            .await?;
        parse(response).await
    }
}

async fn parse<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    response
        .json()
        .await
        .map_err(|err| ClientError::InvalidPayload(err.to_string()))
}

#[async_trait]
impl RequestClient for HttpRequestClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn instance_info(&self) -> Result<InstanceInfo> {
        self.get_json("/instance").await
    }

    async fn register(&self, credentials: &Credentials) -> Result<AuthSession> {
        self.post_json("/auth/register", credentials).await
    }

    async fn login(&self, credentials: &Credentials) -> Result<AuthSession> {
        self.post_json("/auth/login", credentials).await
    }

    async fn list_servers(&self) -> Result<Vec<ServerSummary>> {
        self.get_json("/servers").await
    }

    async fn create_server(&self, request: &CreateServerRequest) -> Result<ServerSummary> {
        self.post_json("/servers", request).await
    }

    async fn join_server(&self, server_id: ServerId) -> Result<()> {
        self.dispatch(
            self.http
                .post(self.endpoint(&format!("/servers/{}/join", server_id.0))),
        )
        .await?;
        Ok(())
    }

    async fn list_channels(&self, server_id: ServerId) -> Result<Vec<ChannelSummary>> {
        self.get_json(&format!("/servers/{}/channels", server_id.0))
            .await
    }

    async fn create_channel(
        &self,
        server_id: ServerId,
        request: &CreateChannelRequest,
    ) -> Result<ChannelSummary> {
        self.post_json(&format!("/servers/{}/channels", server_id.0), request)
            .await
    }

    async fn list_roles(&self, server_id: ServerId) -> Result<Vec<RoleSummary>> {
        self.get_json(&format!("/servers/{}/roles", server_id.0))
            .await
    }

    async fn create_role(
        &self,
        server_id: ServerId,
        request: &CreateRoleRequest,
    ) -> Result<RoleSummary> {
        self.post_json(&format!("/servers/{}/roles", server_id.0), request)
            .await
    }

    async fn list_messages(
        &self,
        channel_id: ChannelId,
        limit: u32,
        before: Option<MessageId>,
    ) -> Result<Vec<ChatMessage>> {
        let request = self
            .http
            .get(self.endpoint(&format!("/channels/{}/messages", channel_id.0)))
            .query(&ListMessagesQuery {
                limit: limit.clamp(1, 100),
                before: before.map(|id| id.0),
            });
        parse(self.dispatch(request).await?).await
    }

    async fn send_message(
        &self,
        channel_id: ChannelId,
        request: &SendMessageRequest,
    ) -> Result<ChatMessage> {
        self.post_json(&format!("/channels/{}/messages", channel_id.0), request)
            .await
    }

    async fn delete_message(&self, channel_id: ChannelId, message_id: MessageId) -> Result<()> {
        self.dispatch(self.http.delete(self.endpoint(&format!(
            "/channels/{}/messages/{}",
            channel_id.0, message_id.0
        ))))
        .await?;
        Ok(())
    }

    async fn list_members(&self, server_id: ServerId) -> Result<Vec<Member>> {
        self.get_json(&format!("/servers/{}/members", server_id.0))
            .await
    }

    async fn fetch_member(&self, server_id: ServerId, user_id: UserId) -> Result<Member> {
        self.get_json(&format!("/servers/{}/members/{}", server_id.0, user_id.0))
            .await
    }

    async fn update_member(
        &self,
        server_id: ServerId,
        user_id: UserId,
        patch: &MemberPatch,
    ) -> Result<Member> {
        let request = self
            .http
            .patch(self.endpoint(&format!(
                "/servers/{}/members/{}",
                server_id.0, user_id.0
            )))
            .json(patch);
        parse(self.dispatch(request).await?).await
    }

    async fn list_voice_participants(
        &self,
        channel_id: ChannelId,
    ) -> Result<Vec<VoiceParticipant>> {
        self.get_json(&format!("/channels/{}/voice", channel_id.0))
            .await
    }

    async fn update_voice_state(
        &self,
        channel_id: ChannelId,
        request: &VoiceStateRequest,
    ) -> Result<()> {
        self.dispatch(
            self.http
                .put(self.endpoint(&format!("/channels/{}/voice", channel_id.0)))
                .json(request),
        )
        .await?;
        Ok(())
    }

    async fn upload_avatar(&self, bytes: Vec<u8>, content_type: &str) -> Result<UserProfile> {
        let request = self
            .http
            .post(self.endpoint("/users/me/avatar"))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes);
        parse(self.dispatch(request).await?).await
    }
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
