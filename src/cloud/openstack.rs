//! OpenStack-compatible implementation of [`CloudClient`].
//!
//! Authenticates against keystone v3 with a password-scoped token and
//! resolves per-service endpoints from the catalog by service type,
//! region and interface. Every operation is a single blocking HTTP
//! call; waiting is the caller's job.

use crate::cloud::{
    CloudClient, CloudError, Flavor, Image, Keypair, Network, Result, Server, ServerSpec, Subnet,
    Volume, VolumeAttachment,
};
use crate::config::AuthConfig;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

const TOKEN_HEADER: &str = "X-Auth-Token";
/// Compute microversion; remote consoles need at least 2.6.
const COMPUTE_API_VERSION: &str = "compute 2.79";

/// Resolved service endpoints for one region/interface.
#[derive(Debug, Clone)]
struct ServiceCatalog {
    image: String,
    compute: String,
    network: String,
    volume: String,
}

pub struct OpenStackClient {
    agent: ureq::Agent,
    token: String,
    catalog: ServiceCatalog,
}

impl OpenStackClient {
    /// Authenticate and resolve service endpoints.
    ///
    /// Any failure here is a [`CloudError::Connect`]: fatal, never
    /// retried.
    pub fn connect(auth: &AuthConfig) -> Result<Self> {
        let agent = ureq::Agent::new_with_defaults();
        let url = format!("{}/auth/tokens", normalize_auth_url(&auth.auth_url));
        let body = json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {
                        "user": {
                            "name": auth.username,
                            "domain": { "name": auth.user_domain_name },
                            "password": auth.password,
                        }
                    }
                },
                "scope": {
                    "project": {
                        "name": auth.project_name,
                        "domain": { "name": auth.project_domain_name },
                    }
                }
            }
        });

        let mut response = agent
            .post(&url)
            .send_json(&body)
            .map_err(|e| CloudError::Connect {
                message: e.to_string(),
            })?;

        let token = response
            .headers()
            .get("X-Subject-Token")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| CloudError::Connect {
                message: "identity response carried no X-Subject-Token".to_string(),
            })?;

        let token_body: TokenResponse =
            response
                .body_mut()
                .read_json()
                .map_err(|e| CloudError::Connect {
                    message: format!("invalid identity response: {e}"),
                })?;

        let catalog = resolve_catalog(&token_body.token.catalog, auth)?;

        Ok(Self {
            agent,
            token,
            catalog,
        })
    }

    fn get_json<T: for<'de> Deserialize<'de>>(&self, base: &str, path: &str) -> Result<T> {
        self.agent
            .get(&join(base, path))
            .header(TOKEN_HEADER, &self.token)
            .header("OpenStack-API-Version", COMPUTE_API_VERSION)
            .call()
            .map_err(api_error)?
            .body_mut()
            .read_json()
            .map_err(|e| CloudError::InvalidResponse(e.to_string()))
    }

    fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        base: &str,
        path: &str,
        body: &Value,
    ) -> Result<T> {
        self.agent
            .post(&join(base, path))
            .header(TOKEN_HEADER, &self.token)
            .header("OpenStack-API-Version", COMPUTE_API_VERSION)
            .send_json(body)
            .map_err(api_error)?
            .body_mut()
            .read_json()
            .map_err(|e| CloudError::InvalidResponse(e.to_string()))
    }

    /// POST where the response body does not matter.
    fn post_action(&self, base: &str, path: &str, body: &Value) -> Result<()> {
        self.agent
            .post(&join(base, path))
            .header(TOKEN_HEADER, &self.token)
            .header("OpenStack-API-Version", COMPUTE_API_VERSION)
            .send_json(body)
            .map_err(api_error)?;
        Ok(())
    }

    fn delete(&self, base: &str, path: &str) -> Result<()> {
        self.agent
            .delete(&join(base, path))
            .header(TOKEN_HEADER, &self.token)
            .header("OpenStack-API-Version", COMPUTE_API_VERSION)
            .call()
            .map_err(api_error)?;
        Ok(())
    }
}

impl CloudClient for OpenStackClient {
    fn create_image(
        &self,
        name: &str,
        file: &Path,
        metadata: &BTreeMap<String, String>,
    ) -> Result<Image> {
        let mut body = json!({
            "name": name,
            "disk_format": "raw",
            "container_format": "bare",
            "visibility": "private",
            "tags": ["personal"],
        });
        // Per-image metadata rides along as extra image properties.
        for (key, value) in metadata {
            body[key] = Value::String(value.clone());
        }
        let image: Image = self.post_json(&self.catalog.image, "/v2/images", &body)?;

        let data = File::open(file)?;
        self.agent
            .put(&join(&self.catalog.image, &format!("/v2/images/{}/file", image.id)))
            .header(TOKEN_HEADER, &self.token)
            .header("Content-Type", "application/octet-stream")
            .send(data)
            .map_err(api_error)?;

        Ok(image)
    }

    fn delete_image(&self, image_id: &str) -> Result<()> {
        self.delete(&self.catalog.image, &format!("/v2/images/{image_id}"))
    }

    fn create_keypair(&self, name: &str, public_key: &str) -> Result<Keypair> {
        let body = json!({ "keypair": { "name": name, "public_key": public_key } });
        let wrapped: KeypairWrapper =
            self.post_json(&self.catalog.compute, "/os-keypairs", &body)?;
        Ok(wrapped.keypair)
    }

    fn delete_keypair(&self, name: &str) -> Result<()> {
        self.delete(&self.catalog.compute, &format!("/os-keypairs/{name}"))
    }

    fn create_server(&self, spec: &ServerSpec) -> Result<Server> {
        let body = json!({
            "server": {
                "name": spec.name,
                "flavorRef": spec.flavor_id,
                "key_name": spec.key_name,
                "networks": [{ "uuid": spec.network_id }],
                "block_device_mapping_v2": [{
                    "boot_index": "0",
                    "uuid": spec.image_id,
                    "source_type": "image",
                    "destination_type": "volume",
                    "volume_size": spec.root_volume_size_gb,
                    "delete_on_termination": true,
                    "disk_bus": "virtio",
                }],
            }
        });
        let created: ServerCreatedWrapper =
            self.post_json(&self.catalog.compute, "/servers", &body)?;
        self.get_server(&created.server.id)
    }

    fn get_server(&self, server_id: &str) -> Result<Server> {
        let wrapped: ServerWrapper =
            self.get_json(&self.catalog.compute, &format!("/servers/{server_id}"))?;
        Ok(wrapped.server.into())
    }

    fn delete_server(&self, server_id: &str, force: bool) -> Result<()> {
        if force {
            self.post_action(
                &self.catalog.compute,
                &format!("/servers/{server_id}/action"),
                &json!({ "forceDelete": null }),
            )
        } else {
            self.delete(&self.catalog.compute, &format!("/servers/{server_id}"))
        }
    }

    fn stop_server(&self, server_id: &str) -> Result<()> {
        self.post_action(
            &self.catalog.compute,
            &format!("/servers/{server_id}/action"),
            &json!({ "os-stop": null }),
        )
    }

    fn start_server(&self, server_id: &str) -> Result<()> {
        self.post_action(
            &self.catalog.compute,
            &format!("/servers/{server_id}/action"),
            &json!({ "os-start": null }),
        )
    }

    fn server_console_output(&self, server_id: &str) -> Result<String> {
        let response: ConsoleOutput = self.post_json(
            &self.catalog.compute,
            &format!("/servers/{server_id}/action"),
            &json!({ "os-getConsoleOutput": {} }),
        )?;
        Ok(response.output)
    }

    fn server_console_url(&self, server_id: &str, console_type: &str) -> Result<String> {
        let response: RemoteConsoleWrapper = self.post_json(
            &self.catalog.compute,
            &format!("/servers/{server_id}/remote-consoles"),
            &json!({ "remote_console": { "protocol": "vnc", "type": console_type } }),
        )?;
        Ok(response.remote_console.url)
    }

    fn change_server_password(&self, server_id: &str, new_password: &str) -> Result<()> {
        self.post_action(
            &self.catalog.compute,
            &format!("/servers/{server_id}/action"),
            &json!({ "changePassword": { "adminPass": new_password } }),
        )
    }

    fn create_server_interface(&self, server_id: &str, network_id: &str) -> Result<()> {
        self.post_action(
            &self.catalog.compute,
            &format!("/servers/{server_id}/os-interface"),
            &json!({ "interfaceAttachment": { "net_id": network_id } }),
        )
    }

    fn volume_attachments(&self, server_id: &str) -> Result<Vec<VolumeAttachment>> {
        let wrapped: AttachmentsWrapper = self.get_json(
            &self.catalog.compute,
            &format!("/servers/{server_id}/os-volume_attachments"),
        )?;
        Ok(wrapped.volume_attachments)
    }

    fn attach_volume(&self, server_id: &str, volume_id: &str) -> Result<()> {
        self.post_action(
            &self.catalog.compute,
            &format!("/servers/{server_id}/os-volume_attachments"),
            &json!({ "volumeAttachment": { "volumeId": volume_id } }),
        )
    }

    fn find_flavor(&self, name: &str) -> Result<Flavor> {
        let wrapped: FlavorsWrapper = self.get_json(&self.catalog.compute, "/flavors")?;
        wrapped
            .flavors
            .into_iter()
            .find(|f| f.name == name)
            .ok_or(CloudError::NotFound {
                kind: "flavor",
                name: name.to_string(),
            })
    }

    fn find_network(&self, name: &str) -> Result<Network> {
        let wrapped: NetworksWrapper = self.get_json(
            &self.catalog.network,
            &format!("/v2.0/networks?name={name}"),
        )?;
        wrapped
            .networks
            .into_iter()
            .next()
            .ok_or(CloudError::NotFound {
                kind: "network",
                name: name.to_string(),
            })
    }

    fn create_network(&self, name: &str) -> Result<Network> {
        let wrapped: NetworkWrapper = self.post_json(
            &self.catalog.network,
            "/v2.0/networks",
            &json!({ "network": { "name": name } }),
        )?;
        Ok(wrapped.network)
    }

    fn delete_network(&self, network_id: &str) -> Result<()> {
        self.delete(&self.catalog.network, &format!("/v2.0/networks/{network_id}"))
    }

    fn create_subnet(&self, name: &str, network_id: &str, cidr: &str) -> Result<Subnet> {
        let wrapped: SubnetWrapper = self.post_json(
            &self.catalog.network,
            "/v2.0/subnets",
            &json!({ "subnet": {
                "name": name,
                "network_id": network_id,
                "cidr": cidr,
                "ip_version": 4,
            }}),
        )?;
        Ok(wrapped.subnet)
    }

    fn delete_subnet(&self, subnet_id: &str) -> Result<()> {
        self.delete(&self.catalog.network, &format!("/v2.0/subnets/{subnet_id}"))
    }

    fn create_volume(&self, name: &str, size_gb: u32) -> Result<Volume> {
        let wrapped: VolumeWrapper = self.post_json(
            &self.catalog.volume,
            "/volumes",
            &json!({ "volume": { "name": name, "size": size_gb } }),
        )?;
        Ok(wrapped.volume)
    }

    fn get_volume(&self, volume_id: &str) -> Result<Volume> {
        let wrapped: VolumeWrapper =
            self.get_json(&self.catalog.volume, &format!("/volumes/{volume_id}"))?;
        Ok(wrapped.volume)
    }

    fn delete_volume(&self, volume_id: &str) -> Result<()> {
        self.delete(&self.catalog.volume, &format!("/volumes/{volume_id}"))
    }

    fn extend_volume(&self, volume_id: &str, new_size_gb: u32) -> Result<()> {
        self.post_action(
            &self.catalog.volume,
            &format!("/volumes/{volume_id}/action"),
            &json!({ "os-extend": { "new_size": new_size_gb } }),
        )
    }

    fn reset_volume_status(&self, volume_id: &str, status: &str) -> Result<()> {
        self.post_action(
            &self.catalog.volume,
            &format!("/volumes/{volume_id}/action"),
            &json!({ "os-reset_status": {
                "status": status,
                "attach_status": "detached",
            }}),
        )
    }
}

// ============================================================================
// Catalog resolution
// ============================================================================

fn normalize_auth_url(auth_url: &str) -> String {
    let trimmed = auth_url.trim_end_matches('/');
    if trimmed.ends_with("/v3") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/v3")
    }
}

fn join(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

fn resolve_catalog(services: &[CatalogService], auth: &AuthConfig) -> Result<ServiceCatalog> {
    let find = |service_type: &str| -> Result<String> {
        services
            .iter()
            .filter(|s| s.service_type == service_type)
            .flat_map(|s| &s.endpoints)
            .find(|e| {
                e.interface == auth.interface
                    && e.region.as_deref().is_none_or(|r| r == auth.region_name)
            })
            .map(|e| e.url.trim_end_matches('/').to_string())
            .ok_or_else(|| CloudError::Connect {
                message: format!(
                    "catalog has no {service_type} endpoint for region {} interface {}",
                    auth.region_name, auth.interface
                ),
            })
    };

    Ok(ServiceCatalog {
        image: find("image")?,
        compute: find("compute")?,
        network: find("network")?,
        volume: find("volumev3")?,
    })
}

fn api_error(err: ureq::Error) -> CloudError {
    match err {
        ureq::Error::StatusCode(code) => CloudError::Api {
            status: code,
            message: format!("HTTP {code}"),
        },
        other => CloudError::Api {
            status: 0,
            message: other.to_string(),
        },
    }
}

// ============================================================================
// API response types
// ============================================================================

#[derive(Deserialize)]
struct TokenResponse {
    token: TokenBody,
}

#[derive(Deserialize)]
struct TokenBody {
    #[serde(default)]
    catalog: Vec<CatalogService>,
}

#[derive(Deserialize)]
struct CatalogService {
    #[serde(rename = "type")]
    service_type: String,
    endpoints: Vec<CatalogEndpoint>,
}

#[derive(Deserialize)]
struct CatalogEndpoint {
    interface: String,
    #[serde(default)]
    region: Option<String>,
    url: String,
}

#[derive(Deserialize)]
struct KeypairWrapper {
    keypair: Keypair,
}

#[derive(Deserialize)]
struct ServerCreatedWrapper {
    server: ServerCreated,
}

#[derive(Deserialize)]
struct ServerCreated {
    id: String,
}

#[derive(Deserialize)]
struct ServerWrapper {
    server: ApiServer,
}

#[derive(Deserialize)]
struct ApiServer {
    id: String,
    name: String,
    status: String,
    #[serde(default)]
    addresses: BTreeMap<String, Vec<ApiAddress>>,
}

#[derive(Deserialize)]
struct ApiAddress {
    addr: String,
}

impl From<ApiServer> for Server {
    fn from(s: ApiServer) -> Self {
        Self {
            id: s.id,
            name: s.name,
            status: s.status,
            addresses: s
                .addresses
                .into_iter()
                .map(|(net, addrs)| (net, addrs.into_iter().map(|a| a.addr).collect()))
                .collect(),
        }
    }
}

#[derive(Deserialize)]
struct ConsoleOutput {
    output: String,
}

#[derive(Deserialize)]
struct RemoteConsoleWrapper {
    remote_console: RemoteConsole,
}

#[derive(Deserialize)]
struct RemoteConsole {
    url: String,
}

#[derive(Deserialize)]
struct AttachmentsWrapper {
    #[serde(rename = "volumeAttachments")]
    volume_attachments: Vec<VolumeAttachment>,
}

#[derive(Deserialize)]
struct FlavorsWrapper {
    flavors: Vec<Flavor>,
}

#[derive(Deserialize)]
struct NetworksWrapper {
    networks: Vec<Network>,
}

#[derive(Deserialize)]
struct NetworkWrapper {
    network: Network,
}

#[derive(Deserialize)]
struct SubnetWrapper {
    subnet: Subnet,
}

#[derive(Deserialize)]
struct VolumeWrapper {
    volume: Volume,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth() -> AuthConfig {
        AuthConfig {
            auth_url: "https://identity.example/v3".into(),
            region_name: "region-a".into(),
            project_name: "ci".into(),
            username: "runner".into(),
            password: "secret".into(),
            user_domain_name: "Default".into(),
            project_domain_name: "Default".into(),
            interface: "public".into(),
        }
    }

    #[test]
    fn test_normalize_auth_url() {
        assert_eq!(
            normalize_auth_url("https://id.example"),
            "https://id.example/v3"
        );
        assert_eq!(
            normalize_auth_url("https://id.example/v3/"),
            "https://id.example/v3"
        );
    }

    #[test]
    fn test_resolve_catalog_picks_region_and_interface() {
        let services: Vec<CatalogService> = serde_json::from_value(serde_json::json!([
            {
                "type": "compute",
                "endpoints": [
                    { "interface": "internal", "region": "region-a", "url": "https://int" },
                    { "interface": "public", "region": "region-b", "url": "https://b" },
                    { "interface": "public", "region": "region-a", "url": "https://nova/v2.1/" },
                ]
            },
            { "type": "image", "endpoints": [
                { "interface": "public", "region": "region-a", "url": "https://glance" } ] },
            { "type": "network", "endpoints": [
                { "interface": "public", "region": "region-a", "url": "https://neutron" } ] },
            { "type": "volumev3", "endpoints": [
                { "interface": "public", "region": "region-a", "url": "https://cinder/v3/proj" } ] }
        ]))
        .unwrap();

        let catalog = resolve_catalog(&services, &auth()).unwrap();
        assert_eq!(catalog.compute, "https://nova/v2.1");
        assert_eq!(catalog.volume, "https://cinder/v3/proj");
    }

    #[test]
    fn test_resolve_catalog_missing_service() {
        let services: Vec<CatalogService> = serde_json::from_value(serde_json::json!([
            { "type": "compute", "endpoints": [] }
        ]))
        .unwrap();
        assert!(resolve_catalog(&services, &auth()).is_err());
    }

    #[test]
    fn test_server_address_mapping() {
        let api: ServerWrapper = serde_json::from_value(serde_json::json!({
            "server": {
                "id": "s1",
                "name": "vm",
                "status": "ACTIVE",
                "addresses": { "public210": [ { "addr": "198.51.100.7" } ] }
            }
        }))
        .unwrap();
        let server: Server = api.server.into();
        assert_eq!(server.address_on("public210"), Some("198.51.100.7"));
        assert_eq!(server.address_on("private"), None);
    }
}
