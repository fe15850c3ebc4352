use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use shared::{
    domain::{ChannelId, VoiceParticipant, VoiceSessionState},
    protocol::{GatewayEvent, VoiceStateRequest},
};
use tokio::sync::Mutex;

use crate::{api::RequestClient, error::Result, state::Reconcile};

/// Who is in which voice channel, keyed per channel.
///
/// Joins upsert last-write-wins; leaves remove; a channel whose set empties
/// loses its key entirely rather than lingering empty.
pub struct VoiceParticipants {
    api: Arc<dyn RequestClient>,
    inner: Mutex<HashMap<ChannelId, Vec<VoiceParticipant>>>,
}

impl VoiceParticipants {
    pub fn new(api: Arc<dyn RequestClient>) -> Arc<Self> {
        Arc::new(Self {
            api,
            inner: Mutex::new(HashMap::new()),
        })
    }

    /// Authoritative pull for one channel.
    pub async fn fetch(&self, channel_id: ChannelId) -> Result<Vec<VoiceParticipant>> {
        let participants = self.api.list_voice_participants(channel_id).await?;
        let mut channels = self.inner.lock().await;
        if participants.is_empty() {
            channels.remove(&channel_id);
        } else {
            channels.insert(channel_id, participants.clone());
        }
        Ok(participants)
    }

    pub async fn participants(&self, channel_id: ChannelId) -> Vec<VoiceParticipant> {
        self.inner
            .lock()
            .await
            .get(&channel_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn occupied_channels(&self) -> Vec<ChannelId> {
        let mut channels: Vec<ChannelId> = self.inner.lock().await.keys().copied().collect();
        channels.sort();
        channels
    }
}

#[async_trait]
impl Reconcile for VoiceParticipants {
    async fn apply(&self, event: &GatewayEvent) {
        let GatewayEvent::VoiceStateUpdate(update) = event else {
            return;
        };
        let mut channels = self.inner.lock().await;
        let participants = channels.entry(update.channel_id).or_default();
        participants.retain(|participant| participant.user_id != update.user_id);
        if update.joined {
            participants.push(VoiceParticipant {
                user_id: update.user_id,
                channel_id: update.channel_id,
                muted: update.muted,
                deafened: update.deafened,
                profile: update.profile.clone(),
            });
        }
        if participants.is_empty() {
            channels.remove(&update.channel_id);
        }
    }
}

/// The local user's voice state, one per process.
///
/// Mute/deafen apply optimistically and roll back when the request fails.
/// Joining the channel the user is already in means leaving it.
pub struct VoiceSession {
    api: Arc<dyn RequestClient>,
    inner: Mutex<VoiceSessionState>,
}

impl VoiceSession {
    pub fn new(api: Arc<dyn RequestClient>) -> Arc<Self> {
        Arc::new(Self {
            api,
            inner: Mutex::new(VoiceSessionState::default()),
        })
    }

    pub async fn state(&self) -> VoiceSessionState {
        *self.inner.lock().await
    }

    pub async fn join(&self, channel_id: ChannelId) -> Result<()> {
        let mut state = self.inner.lock().await;
        if state.current_channel_id == Some(channel_id) {
            // Joining the current channel toggles off.
            self.api
                .update_voice_state(
                    channel_id,
                    &VoiceStateRequest {
                        joined: false,
                        muted: state.muted,
                        deafened: state.deafened,
                    },
                )
                .await?;
            state.current_channel_id = None;
            return Ok(());
        }

        self.api
            .update_voice_state(
                channel_id,
                &VoiceStateRequest {
                    joined: true,
                    muted: state.muted,
                    deafened: state.deafened,
                },
            )
            .await?;
        state.current_channel_id = Some(channel_id);
        Ok(())
    }

    pub async fn leave(&self) -> Result<()> {
        let mut state = self.inner.lock().await;
        let Some(channel_id) = state.current_channel_id else {
            return Ok(());
        };
        self.api
            .update_voice_state(
                channel_id,
                &VoiceStateRequest {
                    joined: false,
                    muted: state.muted,
                    deafened: state.deafened,
                },
            )
            .await?;
        state.current_channel_id = None;
        Ok(())
    }

    pub async fn set_muted(&self, muted: bool) -> Result<()> {
        let mut state = self.inner.lock().await;
        let previous = state.muted;
        state.muted = muted;
        if let Some(channel_id) = state.current_channel_id {
            if let Err(err) = self
                .api
                .update_voice_state(
                    channel_id,
                    &VoiceStateRequest {
                        joined: true,
                        muted,
                        deafened: state.deafened,
                    },
                )
                .await
            {
                state.muted = previous;
                return Err(err);
            }
        }
        Ok(())
    }

    pub async fn set_deafened(&self, deafened: bool) -> Result<()> {
        let mut state = self.inner.lock().await;
        let previous = state.deafened;
        state.deafened = deafened;
        if let Some(channel_id) = state.current_channel_id {
            if let Err(err) = self
                .api
                .update_voice_state(
                    channel_id,
                    &VoiceStateRequest {
                        joined: true,
                        muted: state.muted,
                        deafened,
                    },
                )
                .await
            {
                state.deafened = previous;
                return Err(err);
            }
        }
        Ok(())
    }
}
