use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, ser::SerializeStruct, Deserialize, Serialize};

use crate::domain::{
    ChannelId, ChannelKind, ChatMessage, InstanceMode, Member, MessageId, PresenceStatus, RoleId,
    ServerId, UserId, UserProfile,
};

/// Raw shape of every push frame: `{"type": <string>, "data": <object|null>}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

/// One push event from a host's event stream.
///
/// The union is closed over the kinds this client consumes; a frame with a
/// tag outside it decodes to `Unknown` so subscribers can skip it, while a
/// malformed payload under a known tag is a decode error the stream layer
/// drops and logs.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    MessageCreate(ChatMessage),
    MessageDelete(MessageDeleted),
    MemberJoin(Member),
    MemberUpdate(MemberUpdated),
    MemberLeave(MemberLeft),
    PresenceUpdate(PresenceUpdated),
    VoiceStateUpdate(VoiceStateUpdated),
    UserUpdate(UserProfile),
    Unknown { kind: String },
}

impl GatewayEvent {
    pub fn kind(&self) -> &str {
        match self {
            Self::MessageCreate(_) => "MessageCreate",
            Self::MessageDelete(_) => "MessageDelete",
            Self::MemberJoin(_) => "MemberJoin",
            Self::MemberUpdate(_) => "MemberUpdate",
            Self::MemberLeave(_) => "MemberLeave",
            Self::PresenceUpdate(_) => "PresenceUpdate",
            Self::VoiceStateUpdate(_) => "VoiceStateUpdate",
            Self::UserUpdate(_) => "UserUpdate",
            Self::Unknown { kind } => kind,
        }
    }
}

fn payload<T, E>(kind: &str, data: Option<serde_json::Value>) -> Result<T, E>
where
    T: DeserializeOwned,
    E: serde::de::Error,
{
    let data = data.unwrap_or(serde_json::Value::Null);
    serde_json::from_value(data)
        .map_err(|err| E::custom(format_args!("invalid {kind} payload: {err}")))
}

impl<'de> Deserialize<'de> for GatewayEvent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let frame = RawFrame::deserialize(deserializer)?;
        Ok(match frame.kind.as_str() {
            "MessageCreate" => Self::MessageCreate(payload(&frame.kind, frame.data)?),
            "MessageDelete" => Self::MessageDelete(payload(&frame.kind, frame.data)?),
            "MemberJoin" => Self::MemberJoin(payload(&frame.kind, frame.data)?),
            "MemberUpdate" => Self::MemberUpdate(payload(&frame.kind, frame.data)?),
            "MemberLeave" => Self::MemberLeave(payload(&frame.kind, frame.data)?),
            "PresenceUpdate" => Self::PresenceUpdate(payload(&frame.kind, frame.data)?),
            "VoiceStateUpdate" => Self::VoiceStateUpdate(payload(&frame.kind, frame.data)?),
            "UserUpdate" => Self::UserUpdate(payload(&frame.kind, frame.data)?),
            _ => Self::Unknown { kind: frame.kind },
        })
    }
}

impl Serialize for GatewayEvent {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let data = match self {
            Self::MessageCreate(message) => serde_json::to_value(message),
            Self::MessageDelete(deleted) => serde_json::to_value(deleted),
            Self::MemberJoin(member) => serde_json::to_value(member),
            Self::MemberUpdate(update) => serde_json::to_value(update),
            Self::MemberLeave(left) => serde_json::to_value(left),
            Self::PresenceUpdate(presence) => serde_json::to_value(presence),
            Self::VoiceStateUpdate(update) => serde_json::to_value(update),
            Self::UserUpdate(profile) => serde_json::to_value(profile),
            Self::Unknown { .. } => Ok(serde_json::Value::Null),
        }
        .map_err(serde::ser::Error::custom)?;

        let mut frame = serializer.serialize_struct("GatewayEvent", 2)?;
        frame.serialize_field("type", self.kind())?;
        frame.serialize_field("data", &data)?;
        frame.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDeleted {
    pub channel_id: ChannelId,
    pub id: MessageId,
}

/// Membership patch pushed when roles or nickname change. Carries no live
/// presence; reconcilers keep the presence they already know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberUpdated {
    pub server_id: ServerId,
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(default)]
    pub roles: HashSet<RoleId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joined_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<UserProfile>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberLeft {
    pub server_id: ServerId,
    pub user_id: UserId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceUpdated {
    pub user_id: UserId,
    pub status: PresenceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceStateUpdated {
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub joined: bool,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub deafened: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<UserProfile>,
}

/// Frames the client writes to the event stream. The identify frame must be
/// the first thing on the wire after the transport opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientFrame {
    Identify { token: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub mode: InstanceMode,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_server_id: Option<ServerId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSession {
    pub token: String,
    pub user: UserProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateServerRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateChannelRequest {
    pub name: String,
    pub kind: ChannelKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSummary {
    pub id: RoleId,
    pub server_id: ServerId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemberPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<HashSet<RoleId>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VoiceStateRequest {
    pub joined: bool,
    pub muted: bool,
    pub deafened: bool,
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
