use super::*;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use shared::domain::{ChannelId, ChannelKind, ChannelSummary, ServerId, ServerSummary, UserId};
use shared::protocol::{CreateChannelRequest, InstanceInfo};
use tokio::net::TcpListener;

use crate::{gateway::ConnectionState, state::directory::ServerDirectory};

#[derive(Clone)]
struct InstanceState {
    info: InstanceInfo,
    servers: Vec<ServerSummary>,
    join_calls: Arc<Mutex<Vec<i64>>>,
    channel_posts: Arc<Mutex<Vec<i64>>>,
}

async fn instance_info(State(state): State<InstanceState>) -> Json<InstanceInfo> {
    Json(state.info.clone())
}

async fn list_servers(State(state): State<InstanceState>) -> Json<Vec<ServerSummary>> {
    Json(state.servers.clone())
}

async fn join_server(
    State(state): State<InstanceState>,
    Path(server_id): Path<i64>,
) -> StatusCode {
    state.join_calls.lock().await.push(server_id);
    StatusCode::NO_CONTENT
}

async fn create_channel(
    State(state): State<InstanceState>,
    Path(server_id): Path<i64>,
    Json(request): Json<CreateChannelRequest>,
) -> Json<ChannelSummary> {
    state.channel_posts.lock().await.push(server_id);
    Json(ChannelSummary {
        id: ChannelId(900 + server_id),
        server_id: ServerId(server_id),
        name: request.name,
        kind: request.kind,
    })
}

fn instance(mode: InstanceMode, default_server_id: Option<i64>) -> InstanceInfo {
    InstanceInfo {
        mode,
        name: "Test Instance".to_string(),
        default_server_id: default_server_id.map(ServerId),
    }
}

fn server(id: i64, name: &str) -> ServerSummary {
    ServerSummary {
        id: ServerId(id),
        name: name.to_string(),
        owner_id: UserId(1),
    }
}

async fn spawn_instance_server(
    info: InstanceInfo,
    servers: Vec<ServerSummary>,
) -> (String, InstanceState) {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let state = InstanceState {
        info,
        servers,
        join_calls: Arc::new(Mutex::new(Vec::new())),
        channel_posts: Arc::new(Mutex::new(Vec::new())),
    };
    let app = Router::new()
        .route("/instance", get(instance_info))
        .route("/servers", get(list_servers))
        .route("/servers/:server_id/join", post(join_server))
        .route("/servers/:server_id/channels", post(create_channel))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), state)
}

async fn registry_with_primary(primary_url: &str) -> (ConnectionRegistry, Arc<Storage>) {
    let storage = Arc::new(Storage::in_memory().await.expect("storage"));
    let registry = ConnectionRegistry::new(RegistryConfig {
        primary_url: primary_url.to_string(),
        storage: Arc::clone(&storage),
        http: reqwest::Client::new(),
        on_unauthorized: None,
    })
    .expect("registry");
    (registry, storage)
}

#[test]
fn normalize_applies_default_scheme_and_port() {
    assert_eq!(
        normalize_instance_url("example.com").expect("normalize"),
        "http://example.com:8443"
    );
}

#[test]
fn normalize_strips_trailing_slashes_only() {
    assert_eq!(
        normalize_instance_url("https://host/").expect("normalize"),
        "https://host"
    );
    assert_eq!(
        normalize_instance_url("https://host/base/").expect("normalize"),
        "https://host/base"
    );
}

#[test]
fn normalize_keeps_explicit_ports() {
    assert_eq!(
        normalize_instance_url("myhost.example:9000").expect("normalize"),
        "http://myhost.example:9000"
    );
    assert_eq!(
        normalize_instance_url("https://myhost.example:9000").expect("normalize"),
        "https://myhost.example:9000"
    );
}

#[test]
fn normalize_is_idempotent() {
    for raw in [
        "example.com",
        "https://host/",
        "myhost.example:9000",
        "http://a.b.c:8443",
        "HTTPS://Mixed.Case/",
    ] {
        let once = normalize_instance_url(raw).expect("first pass");
        let twice = normalize_instance_url(&once).expect("second pass");
        assert_eq!(once, twice, "not idempotent for {raw:?}");
    }
}

#[test]
fn normalize_rejects_unusable_addresses() {
    assert!(matches!(
        normalize_instance_url("   "),
        Err(ClientError::InvalidUrl { .. })
    ));
    assert!(matches!(
        normalize_instance_url("ftp://host"),
        Err(ClientError::InvalidUrl { .. })
    ));
}

#[tokio::test]
async fn add_host_probes_persists_and_auto_joins_default_server() {
    let (base_url, state) =
        spawn_instance_server(instance(InstanceMode::Community, Some(31)), Vec::new()).await;
    let (registry, storage) = registry_with_primary("http://primary.invalid:8443").await;
    registry.set_credential("session-token").await;

    let info = registry.add_host(&base_url).await.expect("add host");
    assert_eq!(info.mode, InstanceMode::Community);
    assert_eq!(info.default_server_id, Some(ServerId(31)));

    // exactly one join attempt for the advertised default server
    assert_eq!(state.join_calls.lock().await.clone(), vec![31]);

    let persisted = storage.load_instances().await.expect("load");
    assert_eq!(persisted.len(), 1);
    assert_eq!(
        persisted[0].url,
        normalize_instance_url(&base_url).expect("normalize")
    );
    assert_eq!(persisted[0].name, "Test Instance");
}

#[tokio::test]
async fn add_host_without_credential_skips_auto_join() {
    let (base_url, state) =
        spawn_instance_server(instance(InstanceMode::Community, Some(31)), Vec::new()).await;
    let (registry, _storage) = registry_with_primary("http://primary.invalid:8443").await;

    registry.add_host(&base_url).await.expect("add host");
    assert!(state.join_calls.lock().await.is_empty());
}

#[tokio::test]
async fn add_host_rejects_known_urls() {
    let (base_url, _state) =
        spawn_instance_server(instance(InstanceMode::Standalone, None), Vec::new()).await;
    let (registry, _storage) = registry_with_primary("http://primary.invalid:8443").await;

    registry.add_host(&base_url).await.expect("first add");
    let err = registry.add_host(&base_url).await.expect_err("second add");
    assert!(matches!(err, ClientError::DuplicateHost(_)));
}

#[tokio::test]
async fn add_host_rejects_unsupported_modes() {
    let (base_url, _state) =
        spawn_instance_server(instance(InstanceMode::Unsupported, None), Vec::new()).await;
    let (registry, storage) = registry_with_primary("http://primary.invalid:8443").await;

    let err = registry.add_host(&base_url).await.expect_err("vetting");
    assert!(matches!(err, ClientError::UnsupportedInstance(_)));
    assert!(storage.load_instances().await.expect("load").is_empty());
    assert!(registry.hosts().await.is_empty());
}

#[tokio::test]
async fn add_host_surfaces_probe_failures() {
    let (registry, _storage) = registry_with_primary("http://primary.invalid:8443").await;
    let err = registry
        .add_host("127.0.0.1:1")
        .await
        .expect_err("unreachable");
    assert!(matches!(err, ClientError::Unreachable(_)));
}

#[tokio::test]
async fn adding_the_primary_url_reuses_its_pair() {
    let (base_url, _state) =
        spawn_instance_server(instance(InstanceMode::Standalone, None), Vec::new()).await;
    let (registry, _storage) = registry_with_primary(&base_url).await;

    registry.add_host(&base_url).await.expect("add primary url");
    let pair = registry.host_pair(&base_url).await.expect("pair");
    assert!(pair.shares_primary());
    assert!(Arc::ptr_eq(&pair.gateway, &registry.primary().gateway));
}

#[tokio::test]
async fn restore_skips_malformed_and_duplicate_entries() {
    let (registry, storage) = registry_with_primary("http://primary.invalid:8443").await;
    storage
        .save_instances(&[
            PersistedInstance {
                url: "alpha.example".to_string(),
                name: "Alpha".to_string(),
            },
            PersistedInstance {
                url: "http://alpha.example:8443".to_string(),
                name: "Alpha again".to_string(),
            },
            PersistedInstance {
                url: "ftp://beta.example".to_string(),
                name: "Broken".to_string(),
            },
            PersistedInstance {
                url: "https://gamma.example".to_string(),
                name: "Gamma".to_string(),
            },
        ])
        .await
        .expect("seed");

    registry.restore_hosts().await;

    let hosts = registry.hosts().await;
    assert_eq!(hosts.len(), 2);
    assert_eq!(hosts[0].url, "http://alpha.example:8443");
    assert_eq!(hosts[1].url, "https://gamma.example");
}

#[tokio::test]
async fn restored_hosts_stay_offline_until_bulk_connect() {
    let (registry, storage) = registry_with_primary("http://primary.invalid:8443").await;
    storage
        .save_instances(&[PersistedInstance {
            url: "https://gamma.example".to_string(),
            name: "Gamma".to_string(),
        }])
        .await
        .expect("seed");
    registry.restore_hosts().await;

    // a credential swap must not wake hosts that were never connected
    registry.set_credential("fresh-token").await;
    let pair = registry
        .host_pair("https://gamma.example")
        .await
        .expect("pair");
    assert!(!pair.gateway.is_active().await);
    assert_eq!(pair.gateway.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn remove_host_disconnects_and_updates_persistence() {
    let (base_url, _state) =
        spawn_instance_server(instance(InstanceMode::Community, None), Vec::new()).await;
    let (registry, storage) = registry_with_primary("http://primary.invalid:8443").await;
    registry.set_credential("session-token").await;

    registry.add_host(&base_url).await.expect("add host");
    let pair = registry.host_pair(&base_url).await.expect("pair");

    registry.remove_host(&base_url).await;
    assert!(registry.hosts().await.is_empty());
    assert!(storage.load_instances().await.expect("load").is_empty());
    assert!(!pair.gateway.is_active().await);

    // removing again is a harmless no-op
    registry.remove_host(&base_url).await;
}

#[tokio::test]
async fn directory_merges_by_server_id_with_first_seen_affinity() {
    let (primary_url, primary_state) = spawn_instance_server(
        instance(InstanceMode::Community, None),
        vec![server(1, "alpha"), server(2, "beta")],
    )
    .await;
    let (remote_url, remote_state) = spawn_instance_server(
        instance(InstanceMode::Community, None),
        vec![server(2, "beta-remote"), server(3, "gamma")],
    )
    .await;

    let (registry, _storage) = registry_with_primary(&primary_url).await;
    registry.add_host(&remote_url).await.expect("add remote");
    // an alias of the primary must not duplicate the standalone entries
    registry.add_host(&primary_url).await.expect("add alias");

    let directory = ServerDirectory::new();
    let servers = directory.fetch(&registry).await.expect("fetch");
    let mut ids: Vec<i64> = servers.iter().map(|summary| summary.id.0).collect();
    ids.sort();
    assert_eq!(ids, vec![1, 2, 3]);

    let normalized_primary = normalize_instance_url(&primary_url).expect("normalize");
    let normalized_remote = normalize_instance_url(&remote_url).expect("normalize");
    assert_eq!(
        directory.server_host(ServerId(2)).await,
        Some(normalized_primary)
    );
    assert_eq!(
        directory.server_host(ServerId(3)).await,
        Some(normalized_remote)
    );

    // writes go to the affinity host
    directory
        .create_channel(
            ServerId(3),
            &CreateChannelRequest {
                name: "general".to_string(),
                kind: ChannelKind::Text,
            },
        )
        .await
        .expect("create channel");
    assert_eq!(remote_state.channel_posts.lock().await.clone(), vec![3]);
    assert!(primary_state.channel_posts.lock().await.is_empty());
}
