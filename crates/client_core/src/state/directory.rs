use std::{collections::HashSet, sync::Arc};

use shared::{
    domain::{ChannelSummary, ServerId, ServerSummary},
    protocol::{CreateChannelRequest, CreateServerRequest},
};
use tokio::sync::Mutex;
use tracing::warn;

use crate::{
    api::RequestClient,
    error::{ClientError, Result},
    registry::ConnectionRegistry,
};

type Source = (String, Arc<dyn RequestClient>);

/// Merged view of the servers visible across every joined host.
///
/// A server id seen from several hosts keeps the first host as its affinity,
/// and writes (channel/server creation, channel listing) are routed through
/// that host's request client. A secondary host with the primary's own
/// origin is skipped while merging so standalone deployments do not list
/// everything twice.
pub struct ServerDirectory {
    inner: Mutex<DirectoryState>,
}

#[derive(Default)]
struct DirectoryState {
    primary: Option<Source>,
    entries: Vec<DirectoryEntry>,
}

struct DirectoryEntry {
    server: ServerSummary,
    host_url: String,
    api: Arc<dyn RequestClient>,
    channels: Vec<ChannelSummary>,
}

impl ServerDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(DirectoryState::default()),
        })
    }

    /// Authoritative pull across the registry's hosts. The primary host's
    /// failure surfaces; an unreachable secondary is logged and skipped.
    pub async fn fetch(&self, registry: &ConnectionRegistry) -> Result<Vec<ServerSummary>> {
        let primary = registry.primary();
        let extras: Vec<Source> = registry
            .secondary_pairs()
            .await
            .into_iter()
            .filter(|pair| !pair.shares_primary())
            .map(|pair| (pair.host.url.clone(), Arc::clone(&pair.api)))
            .collect();
        self.fetch_from(
            (primary.host.url.clone(), Arc::clone(&primary.api)),
            extras,
        )
        .await
    }

    pub async fn fetch_from(
        &self,
        primary: Source,
        extras: Vec<Source>,
    ) -> Result<Vec<ServerSummary>> {
        let mut entries: Vec<DirectoryEntry> = Vec::new();
        let mut seen: HashSet<ServerId> = HashSet::new();

        let servers = primary.1.list_servers().await?;
        for server in servers {
            if seen.insert(server.id) {
                entries.push(DirectoryEntry {
                    server,
                    host_url: primary.0.clone(),
                    api: Arc::clone(&primary.1),
                    channels: Vec::new(),
                });
            }
        }

        for (url, api) in extras {
            if url == primary.0 {
                continue;
            }
            match api.list_servers().await {
                Ok(servers) => {
                    for server in servers {
                        if seen.insert(server.id) {
                            entries.push(DirectoryEntry {
                                server,
                                host_url: url.clone(),
                                api: Arc::clone(&api),
                                channels: Vec::new(),
                            });
                        }
                    }
                }
                Err(err) => {
                    warn!(host = %url, error = %err, "directory: skipping unreachable host");
                }
            }
        }

        let snapshot = entries.iter().map(|entry| entry.server.clone()).collect();
        let mut state = self.inner.lock().await;
        state.primary = Some(primary);
        state.entries = entries;
        Ok(snapshot)
    }

    pub async fn servers(&self) -> Vec<ServerSummary> {
        let state = self.inner.lock().await;
        state.entries.iter().map(|entry| entry.server.clone()).collect()
    }

    /// The host a server's writes are routed to.
    pub async fn server_host(&self, server_id: ServerId) -> Option<String> {
        let state = self.inner.lock().await;
        state
            .entries
            .iter()
            .find(|entry| entry.server.id == server_id)
            .map(|entry| entry.host_url.clone())
    }

    pub async fn fetch_channels(&self, server_id: ServerId) -> Result<Vec<ChannelSummary>> {
        let api = self.affinity(server_id).await?;
        let channels = api.list_channels(server_id).await?;
        let mut state = self.inner.lock().await;
        if let Some(entry) = state
            .entries
            .iter_mut()
            .find(|entry| entry.server.id == server_id)
        {
            entry.channels = channels.clone();
        }
        Ok(channels)
    }

    /// Last fetched channels of a server.
    pub async fn channels(&self, server_id: ServerId) -> Vec<ChannelSummary> {
        let state = self.inner.lock().await;
        state
            .entries
            .iter()
            .find(|entry| entry.server.id == server_id)
            .map(|entry| entry.channels.clone())
            .unwrap_or_default()
    }

    pub async fn create_channel(
        &self,
        server_id: ServerId,
        request: &CreateChannelRequest,
    ) -> Result<ChannelSummary> {
        let api = self.affinity(server_id).await?;
        let channel = api.create_channel(server_id, request).await?;
        let mut state = self.inner.lock().await;
        if let Some(entry) = state
            .entries
            .iter_mut()
            .find(|entry| entry.server.id == server_id)
        {
            entry.channels.push(channel.clone());
        }
        Ok(channel)
    }

    /// New servers are created on the primary host.
    pub async fn create_server(&self, request: &CreateServerRequest) -> Result<ServerSummary> {
        let primary = {
            let state = self.inner.lock().await;
            state.primary.clone()
        }
        .ok_or_else(|| ClientError::Validation("directory has not been fetched".to_string()))?;

        let server = primary.1.create_server(request).await?;
        let mut state = self.inner.lock().await;
        if !state
            .entries
            .iter()
            .any(|entry| entry.server.id == server.id)
        {
            state.entries.push(DirectoryEntry {
                server: server.clone(),
                host_url: primary.0,
                api: primary.1,
                channels: Vec::new(),
            });
        }
        Ok(server)
    }

    async fn affinity(&self, server_id: ServerId) -> Result<Arc<dyn RequestClient>> {
        let state = self.inner.lock().await;
        state
            .entries
            .iter()
            .find(|entry| entry.server.id == server_id)
            .map(|entry| Arc::clone(&entry.api))
            .ok_or(ClientError::NotFound)
    }
}
