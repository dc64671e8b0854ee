//! Resource provisioning for one staging run.
//!
//! Creates image, keypair, server, private network, subnet and extra
//! volume in strict dependency order, then persists the resulting
//! [`ResourceSet`]. Any failure aborts the run and leaves whatever was
//! already created for the teardown stage; there is deliberately no
//! rollback here.

use crate::cloud::{CloudClient, CloudError, ServerSpec, wait_for_server_status};
use crate::config::{ImageProperties, StageConfig};
use crate::resources::ResourceSet;
use crate::retry::PollConfig;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Keypairs are shared per CI runner, not per image.
pub const KEYPAIR_NAME: &str = "gitlab-runner-ssh-key";
pub const PRIVATE_SUBNET_CIDR: &str = "192.168.1.0/24";
pub const EXTRA_VOLUME_SIZE_GB: u32 = 5;

/// Server build budget: 30 attempts, 10 s apart.
const ACTIVE_ATTEMPTS: u32 = 30;
const ACTIVE_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error("could not read public key {path}: {source}")]
    PublicKey {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("image {image}: {message}")]
    ImageProperties { image: String, message: String },

    #[error("server has no address on network {network}")]
    NoAddress { network: String },

    #[error("could not persist resource set: {0}")]
    Persist(String),
}

pub struct Provisioner<'a> {
    client: &'a dyn CloudClient,
    config: &'a StageConfig,
    properties: &'a ImageProperties,
}

impl<'a> Provisioner<'a> {
    pub fn new(
        client: &'a dyn CloudClient,
        config: &'a StageConfig,
        properties: &'a ImageProperties,
    ) -> Self {
        Self {
            client,
            config,
            properties,
        }
    }

    /// Run all creation steps in order and persist the set to
    /// `env_path`.
    pub fn stage(&self, env_path: &Path) -> Result<ResourceSet, ProvisionError> {
        let name = &self.config.image_name;

        log::info!("create image {name}");
        let metadata = self
            .properties
            .metadata(name)
            .map_err(|e| ProvisionError::ImageProperties {
                image: name.clone(),
                message: e.to_string(),
            })?;
        let username = self
            .properties
            .username(name)
            .map_err(|e| ProvisionError::ImageProperties {
                image: name.clone(),
                message: e.to_string(),
            })?
            .to_string();
        let image = self
            .client
            .create_image(name, &self.config.image_path, metadata)?;

        log::info!("create keypair {KEYPAIR_NAME}");
        let public_key = read_public_key(&self.config.public_key_path)?;
        let keypair = self.client.create_keypair(KEYPAIR_NAME, &public_key)?;

        log::info!("create server {name}");
        let flavor = self.client.find_flavor(&self.config.flavor_name)?;
        let public_network = self.client.find_network(&self.config.public_network_name)?;
        let server = self.client.create_server(&ServerSpec {
            name: name.clone(),
            image_id: image.id.clone(),
            flavor_id: flavor.id,
            network_id: public_network.id,
            key_name: keypair.name.clone(),
            root_volume_size_gb: self.config.root_volume_size_gb,
        })?;
        let server = wait_for_server_status(
            self.client,
            &server.id,
            "ACTIVE",
            PollConfig::new(ACTIVE_ATTEMPTS, ACTIVE_INTERVAL),
        )?;

        log::info!("create network {name}_network");
        let network = self.client.create_network(&format!("{name}_network"))?;

        log::info!("create subnet {name}_network_subnet");
        let subnet = self.client.create_subnet(
            &format!("{name}_network_subnet"),
            &network.id,
            PRIVATE_SUBNET_CIDR,
        )?;

        log::info!("create extra volume {name}_extra_volume");
        let extra_volume = self
            .client
            .create_volume(&format!("{name}_extra_volume"), EXTRA_VOLUME_SIZE_GB)?;

        let server_ip = server
            .address_on(&self.config.public_network_name)
            .ok_or_else(|| ProvisionError::NoAddress {
                network: self.config.public_network_name.clone(),
            })?
            .to_string();

        let set = ResourceSet {
            image_id: image.id,
            server_id: server.id,
            keypair_id: keypair.name,
            network_id: network.id,
            subnet_id: subnet.id,
            extra_volume_id: extra_volume.id,
            server_username: username,
            server_name: name.clone(),
            server_ip,
        };
        set.save(env_path)
            .map_err(|e| ProvisionError::Persist(e.to_string()))?;
        Ok(set)
    }
}

/// First line of the public key file, as the keypair API wants it.
fn read_public_key(path: &Path) -> Result<String, ProvisionError> {
    let content = fs::read_to_string(path).map_err(|source| ProvisionError::PublicKey {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(content.lines().next().unwrap_or_default().trim().to_string())
}
