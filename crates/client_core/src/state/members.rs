use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use shared::{
    domain::{Member, PresenceStatus, ServerId, UserId},
    protocol::GatewayEvent,
};
use tokio::sync::Mutex;

use crate::{api::RequestClient, error::Result, state::Reconcile};

/// Per-server membership rosters.
///
/// Presence pushes touch only `presence_status`; membership pushes replace
/// nickname/roles but never clobber the presence already known, because the
/// update payload carries none.
pub struct MemberRoster {
    api: Arc<dyn RequestClient>,
    inner: Mutex<HashMap<ServerId, HashMap<UserId, Member>>>,
}

impl MemberRoster {
    pub fn new(api: Arc<dyn RequestClient>) -> Arc<Self> {
        Arc::new(Self {
            api,
            inner: Mutex::new(HashMap::new()),
        })
    }

    /// Authoritative pull: replaces the whole roster of one server.
    pub async fn fetch(&self, server_id: ServerId) -> Result<Vec<Member>> {
        let members = self.api.list_members(server_id).await?;
        let mut rosters = self.inner.lock().await;
        rosters.insert(
            server_id,
            members
                .iter()
                .cloned()
                .map(|member| (member.user_id, member))
                .collect(),
        );
        Ok(members)
    }

    pub async fn members(&self, server_id: ServerId) -> Vec<Member> {
        let rosters = self.inner.lock().await;
        let mut members: Vec<Member> = rosters
            .get(&server_id)
            .map(|roster| roster.values().cloned().collect())
            .unwrap_or_default();
        members.sort_by_key(|member| member.user_id);
        members
    }

    pub async fn member(&self, server_id: ServerId, user_id: UserId) -> Option<Member> {
        let rosters = self.inner.lock().await;
        rosters
            .get(&server_id)
            .and_then(|roster| roster.get(&user_id))
            .cloned()
    }

    /// Drops every roster, e.g. on logout.
    pub async fn clear(&self) {
        self.inner.lock().await.clear();
    }
}

#[async_trait]
impl Reconcile for MemberRoster {
    async fn apply(&self, event: &GatewayEvent) {
        match event {
            GatewayEvent::MemberJoin(member) => {
                let mut rosters = self.inner.lock().await;
                rosters
                    .entry(member.server_id)
                    .or_default()
                    .entry(member.user_id)
                    .or_insert_with(|| member.clone());
            }
            GatewayEvent::MemberUpdate(update) => {
                let mut rosters = self.inner.lock().await;
                let roster = rosters.entry(update.server_id).or_default();
                match roster.get_mut(&update.user_id) {
                    Some(existing) => {
                        existing.nickname = update.nickname.clone();
                        existing.roles = update.roles.clone();
                        if update.profile.is_some() {
                            existing.profile = update.profile.clone();
                        }
                    }
                    None => {
                        roster.insert(
                            update.user_id,
                            Member {
                                user_id: update.user_id,
                                server_id: update.server_id,
                                nickname: update.nickname.clone(),
                                roles: update.roles.clone(),
                                joined_at: update.joined_at.unwrap_or_else(Utc::now),
                                presence_status: PresenceStatus::Offline,
                                profile: update.profile.clone(),
                            },
                        );
                    }
                }
            }
            GatewayEvent::MemberLeave(left) => {
                let mut rosters = self.inner.lock().await;
                if let Some(roster) = rosters.get_mut(&left.server_id) {
                    roster.remove(&left.user_id);
                }
            }
            GatewayEvent::PresenceUpdate(presence) => {
                let mut rosters = self.inner.lock().await;
                for roster in rosters.values_mut() {
                    if let Some(member) = roster.get_mut(&presence.user_id) {
                        member.presence_status = presence.status;
                    }
                }
            }
            GatewayEvent::UserUpdate(profile) => {
                let mut rosters = self.inner.lock().await;
                for roster in rosters.values_mut() {
                    if let Some(member) = roster.get_mut(&profile.user_id) {
                        member.profile = Some(profile.clone());
                    }
                }
            }
            _ => {}
        }
    }
}
