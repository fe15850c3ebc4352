use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use shared::{
    domain::{ChannelId, ChatMessage, MessageId},
    protocol::{GatewayEvent, SendMessageRequest},
};
use tokio::sync::Mutex;

use crate::{
    api::RequestClient,
    error::{ClientError, Result},
    state::Reconcile,
};

pub const FETCH_LIMIT: u32 = 50;

/// Oldest-first message view of the one currently open channel.
///
/// Deletions tombstone in place so positions never shift. A locally sent
/// message only appears once the response or the echoed push event lands,
/// whichever is first; the copies are deduplicated by id with the event copy
/// as the eventually-consistent value.
pub struct MessageTimeline {
    api: Arc<dyn RequestClient>,
    inner: Mutex<TimelineState>,
}

#[derive(Default)]
struct TimelineState {
    channel_id: Option<ChannelId>,
    messages: Vec<ChatMessage>,
}

impl MessageTimeline {
    pub fn new(api: Arc<dyn RequestClient>) -> Arc<Self> {
        Arc::new(Self {
            api,
            inner: Mutex::new(TimelineState::default()),
        })
    }

    /// Authoritative pull for `channel_id`: replaces the snapshot with the
    /// newest page, reversed into display order.
    pub async fn open(&self, channel_id: ChannelId) -> Result<Vec<ChatMessage>> {
        let fetched = self.api.list_messages(channel_id, FETCH_LIMIT, None).await?;
        let mut state = self.inner.lock().await;
        state.channel_id = Some(channel_id);
        state.messages = fetched;
        state.messages.reverse();
        Ok(state.messages.clone())
    }

    /// Prepends the page older than the oldest known message.
    pub async fn load_older(&self) -> Result<Vec<ChatMessage>> {
        let (channel_id, oldest) = {
            let state = self.inner.lock().await;
            let channel_id = state.channel_id.ok_or_else(no_open_channel)?;
            (channel_id, state.messages.first().map(|message| message.id))
        };
        let mut fetched = self.api.list_messages(channel_id, FETCH_LIMIT, oldest).await?;
        fetched.reverse();

        let mut state = self.inner.lock().await;
        if state.channel_id != Some(channel_id) {
            return Ok(state.messages.clone());
        }
        let known: HashSet<MessageId> = state.messages.iter().map(|message| message.id).collect();
        fetched.retain(|message| !known.contains(&message.id));
        fetched.append(&mut state.messages);
        state.messages = fetched;
        Ok(state.messages.clone())
    }

    /// Drops the snapshot when the channel view goes away.
    pub async fn close(&self) {
        let mut state = self.inner.lock().await;
        state.channel_id = None;
        state.messages.clear();
    }

    pub async fn send(&self, content: impl Into<String>) -> Result<ChatMessage> {
        let channel_id = self
            .inner
            .lock()
            .await
            .channel_id
            .ok_or_else(no_open_channel)?;
        let message = self
            .api
            .send_message(
                channel_id,
                &SendMessageRequest {
                    content: content.into(),
                },
            )
            .await?;

        let mut state = self.inner.lock().await;
        if state.channel_id == Some(channel_id)
            && !state.messages.iter().any(|known| known.id == message.id)
        {
            state.messages.push(message.clone());
        }
        Ok(message)
    }

    pub async fn delete(&self, message_id: MessageId) -> Result<()> {
        let channel_id = self
            .inner
            .lock()
            .await
            .channel_id
            .ok_or_else(no_open_channel)?;
        self.api.delete_message(channel_id, message_id).await?;

        let mut state = self.inner.lock().await;
        if let Some(message) = state
            .messages
            .iter_mut()
            .find(|message| message.id == message_id)
        {
            message.tombstone();
        }
        Ok(())
    }

    pub async fn channel(&self) -> Option<ChannelId> {
        self.inner.lock().await.channel_id
    }

    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.inner.lock().await.messages.clone()
    }
}

fn no_open_channel() -> ClientError {
    ClientError::Validation("no channel is open".to_string())
}

#[async_trait]
impl Reconcile for MessageTimeline {
    async fn apply(&self, event: &GatewayEvent) {
        match event {
            GatewayEvent::MessageCreate(message) => {
                let mut state = self.inner.lock().await;
                if state.channel_id != Some(message.channel_id) {
                    return;
                }
                match state
                    .messages
                    .iter_mut()
                    .find(|known| known.id == message.id)
                {
                    // The echoed copy wins over an optimistic response copy.
                    Some(existing) => *existing = message.clone(),
                    None => state.messages.push(message.clone()),
                }
            }
            GatewayEvent::MessageDelete(deleted) => {
                let mut state = self.inner.lock().await;
                if state.channel_id != Some(deleted.channel_id) {
                    return;
                }
                if let Some(message) = state
                    .messages
                    .iter_mut()
                    .find(|message| message.id == deleted.id)
                {
                    message.tombstone();
                }
            }
            GatewayEvent::UserUpdate(profile) => {
                let mut state = self.inner.lock().await;
                for message in state
                    .messages
                    .iter_mut()
                    .filter(|message| message.author_id == profile.user_id)
                {
                    message.author_profile = Some(profile.clone());
                }
            }
            _ => {}
        }
    }
}
