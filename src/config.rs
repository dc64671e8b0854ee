//! Environment-sourced configuration.
//!
//! Everything is read once at startup into plain structs that get
//! passed by reference; nothing here is ever mutated afterwards and
//! there are no ambient globals.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_required(key: &str) -> Result<String> {
    env::var(key).with_context(|| format!("environment variable {key} is not set"))
}

// ============================================================================
// Cloud auth
// ============================================================================

/// Credentials and endpoint selection for the cloud API.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub auth_url: String,
    pub region_name: String,
    pub project_name: String,
    pub username: String,
    pub password: String,
    pub user_domain_name: String,
    pub project_domain_name: String,
    /// Catalog interface to select endpoints from ("public", "internal", "admin")
    pub interface: String,
}

impl AuthConfig {
    /// Read auth fields from the environment. Domain names default to
    /// "Default" and the interface to "public"; everything else is
    /// required.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            auth_url: env_required("auth_url")?,
            region_name: env_required("region_name")?,
            project_name: env_required("project_name")?,
            username: env_required("username")?,
            password: env_required("password")?,
            user_domain_name: env_or("user_domain_name", "Default"),
            project_domain_name: env_or("project_domain_name", "Default"),
            interface: env_or("interface", "public"),
        })
    }
}

// ============================================================================
// Staging parameters
// ============================================================================

pub const DEFAULT_FLAVOR: &str = "g2-2-1-0";
pub const DEFAULT_PUBLIC_NETWORK: &str = "public210";
pub const DEFAULT_ROOT_SIZE_GB: u32 = 25;

/// Parameters for one staging run.
#[derive(Debug, Clone)]
pub struct StageConfig {
    /// Local path of the image file to upload
    pub image_path: PathBuf,
    /// Name for the image and everything derived from it
    pub image_name: String,
    pub flavor_name: String,
    pub public_network_name: String,
    pub root_volume_size_gb: u32,
    /// Path of the public key the server keypair is created from
    pub public_key_path: PathBuf,
    /// Per-image metadata file (login username etc.)
    pub properties_path: PathBuf,
}

impl StageConfig {
    pub fn from_env() -> Result<Self> {
        let root_size = env_or("server_root_size", &DEFAULT_ROOT_SIZE_GB.to_string());
        let root_volume_size_gb = root_size
            .parse()
            .with_context(|| format!("server_root_size {root_size:?} is not a number"))?;
        Ok(Self {
            image_path: PathBuf::from(env_required("image_path")?),
            image_name: env_required("image_name")?,
            flavor_name: env_or("flavor_name", DEFAULT_FLAVOR),
            public_network_name: env_or("public_network_name", DEFAULT_PUBLIC_NETWORK),
            root_volume_size_gb,
            public_key_path: PathBuf::from(env_required("SSH_PUBLIC_KEY_PATH")?),
            properties_path: PathBuf::from(env_or("image_properties_path", "properties.toml")),
        })
    }
}

// ============================================================================
// SSH coordinates
// ============================================================================

/// Bastion and target coordinates for the double-hop SSH session.
#[derive(Debug, Clone)]
pub struct SshEndpoint {
    pub gateway_host: String,
    pub gateway_port: u16,
    pub gateway_username: String,
    /// Private key used for both hops (forwarded via the agent for the
    /// second one)
    pub private_key_path: PathBuf,
    pub server_username: String,
    pub server_ip: String,
}

impl SshEndpoint {
    /// Build from gateway env vars plus the target coordinates out of
    /// the persisted resource set.
    pub fn from_env(server_username: &str, server_ip: &str) -> Result<Self> {
        let port = env_or("GATEWAY_PORT", "22");
        let key = env_required("SSH_PRIVATE_KEY_PATH")?;
        Ok(Self {
            gateway_host: env_required("GATEWAY_IP")?,
            gateway_port: port
                .parse()
                .with_context(|| format!("GATEWAY_PORT {port:?} is not a port number"))?,
            gateway_username: env_required("GATEWAY_USERNAME")?,
            private_key_path: PathBuf::from(shellexpand::tilde(&key).as_ref()),
            server_username: server_username.to_string(),
            server_ip: server_ip.to_string(),
        })
    }
}

// ============================================================================
// Per-image properties
// ============================================================================

/// Per-image metadata, one TOML table per image name.
///
/// ```toml
/// [almalinux-9]
/// username = "alma"
/// ```
#[derive(Debug, Deserialize)]
pub struct ImageProperties(BTreeMap<String, BTreeMap<String, String>>);

impl ImageProperties {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("could not read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("invalid TOML in {}", path.display()))
    }

    /// All metadata for one image, to be attached to the created image.
    pub fn metadata(&self, image_name: &str) -> Result<&BTreeMap<String, String>> {
        match self.0.get(image_name) {
            Some(table) => Ok(table),
            None => bail!("no properties section for image {image_name:?}"),
        }
    }

    /// The default login username for one image.
    pub fn username(&self, image_name: &str) -> Result<&str> {
        let table = self.metadata(image_name)?;
        match table.get("username") {
            Some(username) => Ok(username),
            None => bail!("image {image_name:?} has no username property"),
        }
    }
}
