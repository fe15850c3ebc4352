pub mod api;
pub mod error;
pub mod gateway;
pub mod registry;
pub mod state;

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod tests_support;

pub use api::{CredentialCell, HttpRequestClient, RequestClient, UnauthorizedHook};
pub use error::{ClientError, Result};
pub use gateway::{ConnectionState, GatewayClient};
pub use registry::{
    normalize_instance_url, ConnectionRegistry, Host, HostPair, RegistryConfig,
};
pub use state::{
    attach,
    directory::ServerDirectory,
    members::MemberRoster,
    messages::MessageTimeline,
    voice::{VoiceParticipants, VoiceSession},
    Reconcile,
};
