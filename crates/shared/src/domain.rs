use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub i64);
    };
}

id_newtype!(UserId);
id_newtype!(ServerId);
id_newtype!(ChannelId);
id_newtype!(MessageId);
id_newtype!(RoleId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Text,
    Voice,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Idle,
    Dnd,
    #[default]
    Offline,
}

/// Operating mode an instance advertises from its info endpoint. Modes this
/// client does not recognize decode as `Unsupported` instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceMode {
    Community,
    Standalone,
    Unsupported,
}

impl<'de> Deserialize<'de> for InstanceMode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "community" => Self::Community,
            "standalone" => Self::Standalone,
            _ => Self::Unsupported,
        })
    }
}

/// Denormalized user snapshot embedded in messages, members and voice
/// participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: UserId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// A single channel message. Deletion tombstones the record in place: the id
/// and position survive, `deleted` flips and `content` empties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub author_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_profile: Option<UserProfile>,
}

impl ChatMessage {
    pub fn tombstone(&mut self) {
        self.deleted = true;
        self.content.clear();
    }
}

/// Membership record, identified by (user_id, server_id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub user_id: UserId,
    pub server_id: ServerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(default)]
    pub roles: HashSet<RoleId>,
    pub joined_at: DateTime<Utc>,
    #[serde(default)]
    pub presence_status: PresenceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<UserProfile>,
}

/// Occupant of a voice channel, identified by (channel_id, user_id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceParticipant {
    pub user_id: UserId,
    pub channel_id: ChannelId,
    pub muted: bool,
    pub deafened: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<UserProfile>,
}

/// Local voice state, one per process. `current_channel_id == None` is the
/// terminal not-in-voice state and also the default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VoiceSessionState {
    pub current_channel_id: Option<ChannelId>,
    pub muted: bool,
    pub deafened: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSummary {
    pub id: ServerId,
    pub name: String,
    pub owner_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSummary {
    pub id: ChannelId,
    pub server_id: ServerId,
    pub name: String,
    pub kind: ChannelKind,
}
