//! Cloud provider capability interface.
//!
//! [`CloudClient`] is the thin seam between the lifecycle stages and
//! the provider API. The real implementation is
//! [`openstack::OpenStackClient`]; tests use the in-memory
//! [`fake::FakeCloud`].

pub mod openstack;

#[cfg(test)]
pub mod fake;

use crate::retry::{PollConfig, poll_until};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Errors from cloud API operations.
#[derive(Debug, Error)]
pub enum CloudError {
    /// Authentication or endpoint discovery failed. Fatal, never retried.
    #[error("cloud connect failed: {message}")]
    Connect { message: String },

    /// The API rejected or failed a request.
    #[error("cloud API error: HTTP {status}: {message}")]
    Api { status: u16, message: String },

    /// A named or referenced resource does not exist.
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    /// A response body could not be understood.
    #[error("invalid cloud response: {0}")]
    InvalidResponse(String),

    /// A bounded wait on a resource state gave up.
    #[error("timed out: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CloudError {
    /// Whether this error means the resource is already gone, which
    /// teardown treats as success.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CloudError::NotFound { .. } | CloudError::Api { status: 404, .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;

// ============================================================================
// Resource types
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct Image {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Keypair {
    /// Keypairs are addressed by name in the compute API
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct Server {
    pub id: String,
    pub name: String,
    /// Provider status string: "BUILD", "ACTIVE", "SHUTOFF", ...
    pub status: String,
    /// Addresses per attached network name
    pub addresses: BTreeMap<String, Vec<String>>,
}

impl Server {
    /// First address on the given network, if any.
    pub fn address_on(&self, network_name: &str) -> Option<&str> {
        self.addresses
            .get(network_name)
            .and_then(|addrs| addrs.first())
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Network {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Subnet {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Volume {
    pub id: String,
    #[serde(rename = "size")]
    pub size_gb: u32,
    pub status: String,
}

/// One volume attached to a server. The attachment id equals the
/// volume id in the compute API.
#[derive(Debug, Clone, Deserialize)]
pub struct VolumeAttachment {
    pub id: String,
    pub device: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Flavor {
    pub id: String,
    pub name: String,
}

/// Parameters for boot-from-volume server creation.
#[derive(Debug, Clone)]
pub struct ServerSpec {
    pub name: String,
    pub image_id: String,
    pub flavor_id: String,
    pub network_id: String,
    pub key_name: String,
    pub root_volume_size_gb: u32,
}

// ============================================================================
// Capability trait
// ============================================================================

/// Everything the lifecycle stages need from the provider.
///
/// One method per API capability; no method retries internally, waiting
/// is done by the `wait_for_*` helpers below.
pub trait CloudClient {
    // image
    fn create_image(
        &self,
        name: &str,
        file: &Path,
        metadata: &BTreeMap<String, String>,
    ) -> Result<Image>;
    fn delete_image(&self, image_id: &str) -> Result<()>;

    // keypair
    fn create_keypair(&self, name: &str, public_key: &str) -> Result<Keypair>;
    fn delete_keypair(&self, name: &str) -> Result<()>;

    // server
    fn create_server(&self, spec: &ServerSpec) -> Result<Server>;
    fn get_server(&self, server_id: &str) -> Result<Server>;
    fn delete_server(&self, server_id: &str, force: bool) -> Result<()>;
    fn stop_server(&self, server_id: &str) -> Result<()>;
    fn start_server(&self, server_id: &str) -> Result<()>;
    fn server_console_output(&self, server_id: &str) -> Result<String>;
    fn server_console_url(&self, server_id: &str, console_type: &str) -> Result<String>;
    fn change_server_password(&self, server_id: &str, new_password: &str) -> Result<()>;
    fn create_server_interface(&self, server_id: &str, network_id: &str) -> Result<()>;
    fn volume_attachments(&self, server_id: &str) -> Result<Vec<VolumeAttachment>>;
    fn attach_volume(&self, server_id: &str, volume_id: &str) -> Result<()>;

    // flavor / network / subnet
    fn find_flavor(&self, name: &str) -> Result<Flavor>;
    fn find_network(&self, name: &str) -> Result<Network>;
    fn create_network(&self, name: &str) -> Result<Network>;
    fn delete_network(&self, network_id: &str) -> Result<()>;
    fn create_subnet(&self, name: &str, network_id: &str, cidr: &str) -> Result<Subnet>;
    fn delete_subnet(&self, subnet_id: &str) -> Result<()>;

    // volume
    fn create_volume(&self, name: &str, size_gb: u32) -> Result<Volume>;
    fn get_volume(&self, volume_id: &str) -> Result<Volume>;
    fn delete_volume(&self, volume_id: &str) -> Result<()>;
    fn extend_volume(&self, volume_id: &str, new_size_gb: u32) -> Result<()>;
    fn reset_volume_status(&self, volume_id: &str, status: &str) -> Result<()>;
}

// ============================================================================
// Wait helpers
// ============================================================================

/// Poll until the server reports the wanted status.
pub fn wait_for_server_status(
    client: &dyn CloudClient,
    server_id: &str,
    status: &str,
    config: PollConfig,
) -> Result<Server> {
    let what = format!("server {server_id} to reach {status}");
    poll_until(&what, config, || match client.get_server(server_id) {
        Ok(server) if server.status == status => Some(Ok(server)),
        Ok(_) => None,
        Err(e) => Some(Err(e)),
    })
    .map_err(|e| CloudError::Timeout(e.to_string()))?
}

/// Poll until the server is gone (lookup returns not-found).
pub fn wait_for_server_deleted(
    client: &dyn CloudClient,
    server_id: &str,
    config: PollConfig,
) -> Result<()> {
    let what = format!("server {server_id} to be deleted");
    poll_until(&what, config, || match client.get_server(server_id) {
        Ok(_) => None,
        Err(e) if e.is_not_found() => Some(Ok(())),
        Err(e) => Some(Err(e)),
    })
    .map_err(|e| CloudError::Timeout(e.to_string()))?
}
