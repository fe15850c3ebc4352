use std::sync::Arc;

use shared::{domain::InstanceMode, protocol::InstanceInfo};
use storage::{PersistedInstance, Storage};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use url::Url;

use crate::{
    api::{CredentialCell, HttpRequestClient, RequestClient, UnauthorizedHook},
    error::{ClientError, Result},
    gateway::GatewayClient,
};

/// Port assumed when the user types a bare `host` with neither scheme nor
/// port.
pub const DEFAULT_INSTANCE_PORT: u16 = 8443;

/// A joined instance. Identity is the normalized URL; records are immutable
/// once created and removed wholesale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    pub url: String,
    pub display_name: String,
}

/// The request/event pair kept alive for one host.
#[derive(Clone)]
pub struct HostPair {
    pub host: Host,
    pub api: Arc<dyn RequestClient>,
    pub gateway: Arc<GatewayClient>,
    shares_primary: bool,
}

impl HostPair {
    /// True when this entry reuses the primary host's connections instead of
    /// owning its own.
    pub fn shares_primary(&self) -> bool {
        self.shares_primary
    }
}

pub struct RegistryConfig {
    /// The default/auth host, as a URL with scheme.
    pub primary_url: String,
    pub storage: Arc<Storage>,
    pub http: reqwest::Client,
    pub on_unauthorized: Option<UnauthorizedHook>,
}

/// Owns the authoritative set of joined hosts and keeps each host's
/// request/event pair alive and credentialed.
pub struct ConnectionRegistry {
    http: reqwest::Client,
    storage: Arc<Storage>,
    credential: CredentialCell,
    on_unauthorized: Option<UnauthorizedHook>,
    primary: HostPair,
    inner: Mutex<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    hosts: Vec<HostPair>,
}

impl ConnectionRegistry {
    pub fn new(config: RegistryConfig) -> Result<Self> {
        let primary_url = normalize_instance_url(&config.primary_url)?;
        let credential: CredentialCell = Arc::new(RwLock::new(None));
        let primary = HostPair {
            host: Host {
                url: primary_url.clone(),
                display_name: primary_url.clone(),
            },
            api: Arc::new(HttpRequestClient::new(
                config.http.clone(),
                primary_url.clone(),
                Arc::clone(&credential),
                config.on_unauthorized.clone(),
            )),
            gateway: Arc::new(GatewayClient::new(&primary_url)),
            shares_primary: false,
        };
        Ok(Self {
            http: config.http,
            storage: config.storage,
            credential,
            on_unauthorized: config.on_unauthorized,
            primary,
            inner: Mutex::new(RegistryInner::default()),
        })
    }

    pub fn primary(&self) -> &HostPair {
        &self.primary
    }

    pub async fn credential(&self) -> Option<String> {
        self.credential.read().await.clone()
    }

    pub async fn hosts(&self) -> Vec<Host> {
        let inner = self.inner.lock().await;
        inner.hosts.iter().map(|pair| pair.host.clone()).collect()
    }

    pub async fn secondary_pairs(&self) -> Vec<HostPair> {
        let inner = self.inner.lock().await;
        inner.hosts.clone()
    }

    pub async fn host_pair(&self, url: &str) -> Option<HostPair> {
        let normalized = normalize_instance_url(url).ok()?;
        let inner = self.inner.lock().await;
        inner
            .hosts
            .iter()
            .find(|pair| pair.host.url == normalized)
            .cloned()
    }

    /// Loads the persisted host list and recreates a pair per entry. One
    /// malformed or duplicate record never fails the rest; gateways are not
    /// connected until a credential arrives.
    pub async fn restore_hosts(&self) {
        let persisted = match self.storage.load_instances().await {
            Ok(list) => list,
            Err(err) => {
                warn!(error = %err, "registry: could not load persisted hosts");
                return;
            }
        };

        let mut inner = self.inner.lock().await;
        for record in persisted {
            let url = match normalize_instance_url(&record.url) {
                Ok(url) => url,
                Err(err) => {
                    warn!(url = %record.url, error = %err, "registry: skipping malformed persisted host");
                    continue;
                }
            };
            if inner.hosts.iter().any(|pair| pair.host.url == url) {
                warn!(url = %url, "registry: skipping duplicate persisted host");
                continue;
            }
            let pair = self.pair_for(url, record.name);
            inner.hosts.push(pair);
        }
        info!(count = inner.hosts.len(), "registry: restored host list");
    }

    /// Registers a new instance: normalize, probe, vet the advertised mode,
    /// persist, and auto-join its default server when one is advertised and a
    /// credential is present. Probe failures surface to the caller; a failed
    /// auto-join only logs, since the add itself succeeded.
    pub async fn add_host(&self, raw_url: &str) -> Result<InstanceInfo> {
        let url = normalize_instance_url(raw_url)?;
        {
            let inner = self.inner.lock().await;
            if inner.hosts.iter().any(|pair| pair.host.url == url) {
                return Err(ClientError::DuplicateHost(url));
            }
        }

        let mut pair = self.pair_for(url.clone(), String::new());
        let info = pair.api.instance_info().await?;
        if !matches!(info.mode, InstanceMode::Community | InstanceMode::Standalone) {
            return Err(ClientError::UnsupportedInstance(info.mode));
        }
        pair.host.display_name = info.name.clone();

        let credential = self.credential().await;
        if let Some(token) = credential.as_deref() {
            pair.gateway.connect(token).await;
        }

        {
            let mut inner = self.inner.lock().await;
            if inner.hosts.iter().any(|existing| existing.host.url == url) {
                return Err(ClientError::DuplicateHost(url));
            }
            inner.hosts.push(pair.clone());
            self.persist_locked(&inner).await;
        }
        info!(url = %url, mode = ?info.mode, "registry: host added");

        if let (Some(server_id), Some(_)) = (info.default_server_id, credential) {
            if let Err(err) = pair.api.join_server(server_id).await {
                warn!(
                    url = %pair.host.url,
                    server_id = server_id.0,
                    error = %err,
                    "registry: auto-join of default server failed"
                );
            }
        }

        Ok(info)
    }

    /// Disconnects and discards a host. Infallible: unknown URLs and
    /// persistence failures only log.
    pub async fn remove_host(&self, url: &str) {
        let normalized = match normalize_instance_url(url) {
            Ok(url) => url,
            Err(err) => {
                warn!(url = %url, error = %err, "registry: remove ignored malformed url");
                return;
            }
        };
        let removed = {
            let mut inner = self.inner.lock().await;
            let position = inner
                .hosts
                .iter()
                .position(|pair| pair.host.url == normalized);
            let removed = position.map(|index| inner.hosts.remove(index));
            if removed.is_some() {
                self.persist_locked(&inner).await;
            }
            removed
        };
        if let Some(pair) = removed {
            if !pair.shares_primary {
                pair.gateway.disconnect().await;
            }
            info!(url = %normalized, "registry: host removed");
        }
    }

    /// Swaps the process-wide credential. Request clients observe it on
    /// their next call; event clients that are currently running re-identify
    /// with the new token. Hosts that were never connected stay that way.
    pub async fn set_credential(&self, token: &str) {
        *self.credential.write().await = Some(token.to_string());
        for pair in self.unique_pairs().await {
            if pair.gateway.is_active().await {
                pair.gateway.connect(token).await;
            }
        }
    }

    /// Login-time bulk connect: store the credential and bring every host's
    /// event stream up.
    pub async fn connect_all(&self, token: &str) {
        *self.credential.write().await = Some(token.to_string());
        for pair in self.unique_pairs().await {
            pair.gateway.connect(token).await;
        }
    }

    /// Logout-time bulk disconnect; also forgets the credential.
    pub async fn disconnect_all(&self) {
        *self.credential.write().await = None;
        for pair in self.unique_pairs().await {
            pair.gateway.disconnect().await;
        }
    }

    /// Primary plus every host that owns its own pair.
    async fn unique_pairs(&self) -> Vec<HostPair> {
        let mut pairs = vec![self.primary.clone()];
        let inner = self.inner.lock().await;
        pairs.extend(
            inner
                .hosts
                .iter()
                .filter(|pair| !pair.shares_primary)
                .cloned(),
        );
        pairs
    }

    /// Builds the pair for a normalized URL, reusing the primary's
    /// connections when the URL is the primary's own.
    fn pair_for(&self, url: String, display_name: String) -> HostPair {
        if url == self.primary.host.url {
            return HostPair {
                host: Host { url, display_name },
                api: Arc::clone(&self.primary.api),
                gateway: Arc::clone(&self.primary.gateway),
                shares_primary: true,
            };
        }
        HostPair {
            host: Host {
                url: url.clone(),
                display_name,
            },
            api: Arc::new(HttpRequestClient::new(
                self.http.clone(),
                url.clone(),
                Arc::clone(&self.credential),
                self.on_unauthorized.clone(),
            )),
            gateway: Arc::new(GatewayClient::new(&url)),
            shares_primary: false,
        }
    }

    async fn persist_locked(&self, inner: &RegistryInner) {
        let records: Vec<PersistedInstance> = inner
            .hosts
            .iter()
            .map(|pair| PersistedInstance {
                url: pair.host.url.clone(),
                name: pair.host.display_name.clone(),
            })
            .collect();
        if let Err(err) = self.storage.save_instances(&records).await {
            warn!(error = %err, "registry: could not persist host list");
        }
    }
}

/// Normalizes a user-supplied instance address into its canonical URL.
///
/// A bare `host[:port]` gets the default `http://` scheme, plus the default
/// instance port when no explicit port was typed either. An address that
/// already carries a scheme keeps its authority untouched. Trailing slashes
/// are stripped. Idempotent.
pub fn normalize_instance_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ClientError::invalid_url(raw, "empty address"));
    }
    let (candidate, had_scheme) = if trimmed.contains("://") {
        (trimmed.to_string(), true)
    } else {
        (format!("http://{trimmed}"), false)
    };
    let parsed =
        Url::parse(&candidate).map_err(|err| ClientError::invalid_url(raw, err.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ClientError::invalid_url(
                raw,
                format!("unsupported scheme {other:?}"),
            ));
        }
    }
    let host = parsed
        .host_str()
        .ok_or_else(|| ClientError::invalid_url(raw, "missing host"))?;

    let port = match parsed.port() {
        Some(port) => Some(port),
        // `Url::port` hides a typed-but-default port (`:80`), so inspect the
        // raw authority before assuming none was given.
        None if !had_scheme && !bare_address_has_port(trimmed) => Some(DEFAULT_INSTANCE_PORT),
        None => None,
    };

    let mut normalized = format!("{}://{}", parsed.scheme(), host);
    if let Some(port) = port {
        normalized.push_str(&format!(":{port}"));
    }
    let path = parsed.path().trim_end_matches('/');
    normalized.push_str(path);
    Ok(normalized)
}

fn bare_address_has_port(address: &str) -> bool {
    let authority = address.split('/').next().unwrap_or(address);
    if let Some(rest) = authority.strip_prefix('[') {
        // Bracketed IPv6: a port can only follow the closing bracket.
        return rest
            .split_once(']')
            .is_some_and(|(_, tail)| tail.starts_with(':'));
    }
    authority
        .rsplit_once(':')
        .is_some_and(|(_, port)| !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()))
}

#[cfg(test)]
#[path = "tests/registry_tests.rs"]
mod tests;
