//! Canned in-process request client shared by the test modules.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{
    domain::{
        ChannelId, ChannelSummary, ChatMessage, Member, MessageId, PresenceStatus, ServerId,
        ServerSummary, UserId, UserProfile, VoiceParticipant,
    },
    protocol::{
        AuthSession, CreateChannelRequest, CreateRoleRequest, CreateServerRequest, Credentials,
        InstanceInfo, MemberPatch, RoleSummary, SendMessageRequest, VoiceStateRequest,
    },
};
use tokio::sync::Mutex;

use crate::{
    api::RequestClient,
    error::{ClientError, Result},
};

/// Request client double: canned responses in, recorded calls out. Anything
/// a test did not stage answers `NotFound` so accidental calls show up.
pub struct StubApi {
    pub base_url: String,
    pub messages: Mutex<Vec<ChatMessage>>,
    pub send_response: Mutex<Option<ChatMessage>>,
    pub members: Mutex<Vec<Member>>,
    pub servers: Mutex<Vec<ServerSummary>>,
    pub channels: Mutex<Vec<ChannelSummary>>,
    pub voice_participants: Mutex<Vec<VoiceParticipant>>,
    pub voice_calls: Mutex<Vec<(ChannelId, VoiceStateRequest)>>,
    pub channel_posts: Mutex<Vec<ServerId>>,
    pub fail_voice_updates: Mutex<bool>,
    pub fail_list_servers: Mutex<bool>,
}

impl Default for StubApi {
    fn default() -> Self {
        Self {
            base_url: "http://stub.example:8443".to_string(),
            messages: Mutex::new(Vec::new()),
            send_response: Mutex::new(None),
            members: Mutex::new(Vec::new()),
            servers: Mutex::new(Vec::new()),
            channels: Mutex::new(Vec::new()),
            voice_participants: Mutex::new(Vec::new()),
            voice_calls: Mutex::new(Vec::new()),
            channel_posts: Mutex::new(Vec::new()),
            fail_voice_updates: Mutex::new(false),
            fail_list_servers: Mutex::new(false),
        }
    }
}

fn unstaged<T>() -> Result<T> {
    Err(ClientError::NotFound)
}

#[async_trait]
impl RequestClient for StubApi {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn instance_info(&self) -> Result<InstanceInfo> {
        unstaged()
    }

    async fn register(&self, _credentials: &Credentials) -> Result<AuthSession> {
        unstaged()
    }

    async fn login(&self, _credentials: &Credentials) -> Result<AuthSession> {
        unstaged()
    }

    async fn list_servers(&self) -> Result<Vec<ServerSummary>> {
        if *self.fail_list_servers.lock().await {
            return Err(ClientError::Unreachable("stub offline".to_string()));
        }
        Ok(self.servers.lock().await.clone())
    }

    async fn create_server(&self, _request: &CreateServerRequest) -> Result<ServerSummary> {
        unstaged()
    }

    async fn join_server(&self, _server_id: ServerId) -> Result<()> {
        unstaged()
    }

    async fn list_channels(&self, _server_id: ServerId) -> Result<Vec<ChannelSummary>> {
        Ok(self.channels.lock().await.clone())
    }

    async fn create_channel(
        &self,
        server_id: ServerId,
        request: &CreateChannelRequest,
    ) -> Result<ChannelSummary> {
        self.channel_posts.lock().await.push(server_id);
        Ok(ChannelSummary {
            id: ChannelId(900 + server_id.0),
            server_id,
            name: request.name.clone(),
            kind: request.kind,
        })
    }

    async fn list_roles(&self, _server_id: ServerId) -> Result<Vec<RoleSummary>> {
        unstaged()
    }

    async fn create_role(
        &self,
        _server_id: ServerId,
        _request: &CreateRoleRequest,
    ) -> Result<RoleSummary> {
        unstaged()
    }

    async fn list_messages(
        &self,
        _channel_id: ChannelId,
        _limit: u32,
        _before: Option<MessageId>,
    ) -> Result<Vec<ChatMessage>> {
        Ok(self.messages.lock().await.clone())
    }

    async fn send_message(
        &self,
        _channel_id: ChannelId,
        _request: &SendMessageRequest,
    ) -> Result<ChatMessage> {
        self.send_response
            .lock()
            .await
            .clone()
            .ok_or(ClientError::NotFound)
    }

    async fn delete_message(&self, _channel_id: ChannelId, _message_id: MessageId) -> Result<()> {
        Ok(())
    }

    async fn list_members(&self, _server_id: ServerId) -> Result<Vec<Member>> {
        Ok(self.members.lock().await.clone())
    }

    async fn fetch_member(&self, _server_id: ServerId, _user_id: UserId) -> Result<Member> {
        unstaged()
    }

    async fn update_member(
        &self,
        _server_id: ServerId,
        _user_id: UserId,
        _patch: &MemberPatch,
    ) -> Result<Member> {
        unstaged()
    }

    async fn list_voice_participants(
        &self,
        _channel_id: ChannelId,
    ) -> Result<Vec<VoiceParticipant>> {
        Ok(self.voice_participants.lock().await.clone())
    }

    async fn update_voice_state(
        &self,
        channel_id: ChannelId,
        request: &VoiceStateRequest,
    ) -> Result<()> {
        self.voice_calls.lock().await.push((channel_id, *request));
        if *self.fail_voice_updates.lock().await {
            return Err(ClientError::Unreachable("stub offline".to_string()));
        }
        Ok(())
    }

    async fn upload_avatar(&self, _bytes: Vec<u8>, _content_type: &str) -> Result<UserProfile> {
        unstaged()
    }
}

pub fn ts() -> DateTime<Utc> {
    "2025-06-01T00:00:00Z".parse().expect("timestamp")
}

pub fn message(id: i64, channel: i64, author: i64, content: &str) -> ChatMessage {
    ChatMessage {
        id: MessageId(id),
        channel_id: ChannelId(channel),
        author_id: UserId(author),
        content: content.to_string(),
        created_at: ts(),
        edited_at: None,
        deleted: false,
        author_profile: None,
    }
}

pub fn member(user: i64, server: i64) -> Member {
    Member {
        user_id: UserId(user),
        server_id: ServerId(server),
        nickname: None,
        roles: Default::default(),
        joined_at: ts(),
        presence_status: PresenceStatus::Offline,
        profile: None,
    }
}

pub fn profile(user: i64, username: &str) -> UserProfile {
    UserProfile {
        user_id: UserId(user),
        username: username.to_string(),
        display_name: None,
        avatar_url: None,
    }
}

pub fn server(id: i64, name: &str) -> ServerSummary {
    ServerSummary {
        id: ServerId(id),
        name: name.to_string(),
        owner_id: UserId(1),
    }
}
