//! In-memory [`CloudClient`] used by unit tests.
//!
//! Records every mutating call in order, hands out deterministic ids,
//! and can be told to fail specific operations.

use crate::cloud::{
    CloudClient, CloudError, Flavor, Image, Keypair, Network, Result, Server, ServerSpec, Subnet,
    Volume, VolumeAttachment,
};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Mutex;

#[derive(Default)]
struct State {
    next_id: u32,
    calls: Vec<String>,
    failing: HashMap<String, u16>,
    servers: HashMap<String, Server>,
    volumes: HashMap<String, Volume>,
    attachments: HashMap<String, Vec<VolumeAttachment>>,
    flavors: Vec<Flavor>,
    networks: Vec<Network>,
    console_output: String,
}

pub struct FakeCloud {
    state: Mutex<State>,
}

impl FakeCloud {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                console_output: "[ 12.3] cloud-init finished".to_string(),
                ..State::default()
            }),
        }
    }

    fn id(state: &mut State, prefix: &str) -> String {
        state.next_id += 1;
        format!("{prefix}-{}", state.next_id)
    }

    fn check(state: &State, op: &str) -> Result<()> {
        if let Some(status) = state.failing.get(op) {
            return Err(CloudError::Api {
                status: *status,
                message: format!("{op} forced to fail"),
            });
        }
        Ok(())
    }

    /// Make the named operation fail with HTTP 500 from now on.
    pub fn fail_on(&self, op: &str) {
        self.state.lock().unwrap().failing.insert(op.to_string(), 500);
    }

    /// Make the named operation report the resource as already gone.
    pub fn fail_not_found(&self, op: &str) {
        self.state.lock().unwrap().failing.insert(op.to_string(), 404);
    }

    /// Mutating calls, in invocation order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn set_console_output(&self, output: &str) {
        self.state.lock().unwrap().console_output = output.to_string();
    }

    pub fn seed_flavor(&self, name: &str) -> String {
        let mut state = self.state.lock().unwrap();
        let id = Self::id(&mut state, "flavor");
        state.flavors.push(Flavor {
            id: id.clone(),
            name: name.to_string(),
        });
        id
    }

    pub fn seed_network(&self, name: &str) -> String {
        let mut state = self.state.lock().unwrap();
        let id = Self::id(&mut state, "net");
        state.networks.push(Network {
            id: id.clone(),
            name: name.to_string(),
        });
        id
    }

    pub fn seed_server(&self, name: &str, status: &str, addrs: &[(&str, &str)]) -> String {
        let mut state = self.state.lock().unwrap();
        let id = Self::id(&mut state, "server");
        let mut addresses: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (net, addr) in addrs {
            addresses
                .entry((*net).to_string())
                .or_default()
                .push((*addr).to_string());
        }
        state.servers.insert(
            id.clone(),
            Server {
                id: id.clone(),
                name: name.to_string(),
                status: status.to_string(),
                addresses,
            },
        );
        state.attachments.insert(id.clone(), Vec::new());
        id
    }

    pub fn seed_volume(&self, size_gb: u32) -> String {
        let mut state = self.state.lock().unwrap();
        let id = Self::id(&mut state, "vol");
        state.volumes.insert(
            id.clone(),
            Volume {
                id: id.clone(),
                size_gb,
                status: "available".to_string(),
            },
        );
        id
    }

    /// Attach an already-seeded volume directly (as the provisioned
    /// root volume would be).
    pub fn seed_attachment(&self, server_id: &str, volume_id: &str, device: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .attachments
            .entry(server_id.to_string())
            .or_default()
            .push(VolumeAttachment {
                id: volume_id.to_string(),
                device: Some(device.to_string()),
            });
    }

    pub fn volume_size(&self, volume_id: &str) -> Option<u32> {
        self.state
            .lock()
            .unwrap()
            .volumes
            .get(volume_id)
            .map(|v| v.size_gb)
    }
}

impl Default for FakeCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl CloudClient for FakeCloud {
    fn create_image(
        &self,
        name: &str,
        _file: &Path,
        _metadata: &BTreeMap<String, String>,
    ) -> Result<Image> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("create_image {name}"));
        Self::check(&state, "create_image")?;
        let id = Self::id(&mut state, "image");
        Ok(Image {
            id,
            name: name.to_string(),
        })
    }

    fn delete_image(&self, image_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("delete_image {image_id}"));
        Self::check(&state, "delete_image")
    }

    fn create_keypair(&self, name: &str, _public_key: &str) -> Result<Keypair> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("create_keypair {name}"));
        Self::check(&state, "create_keypair")?;
        Ok(Keypair {
            name: name.to_string(),
        })
    }

    fn delete_keypair(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("delete_keypair {name}"));
        Self::check(&state, "delete_keypair")
    }

    fn create_server(&self, spec: &ServerSpec) -> Result<Server> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("create_server {}", spec.name));
        Self::check(&state, "create_server")?;
        let id = Self::id(&mut state, "server");
        // Created servers come up ACTIVE with a public address so the
        // provisioner's wait loop resolves immediately.
        let public_net = state
            .networks
            .iter()
            .find(|n| n.id == spec.network_id)
            .map(|n| n.name.clone())
            .unwrap_or_else(|| "public".to_string());
        let mut addresses = BTreeMap::new();
        addresses.insert(public_net, vec!["198.51.100.7".to_string()]);
        let server = Server {
            id: id.clone(),
            name: spec.name.clone(),
            status: "ACTIVE".to_string(),
            addresses,
        };
        state.servers.insert(id.clone(), server.clone());
        // Boot-from-volume root disk.
        let root_id = Self::id(&mut state, "vol");
        state.volumes.insert(
            root_id.clone(),
            Volume {
                id: root_id.clone(),
                size_gb: spec.root_volume_size_gb,
                status: "in-use".to_string(),
            },
        );
        state.attachments.insert(
            id,
            vec![VolumeAttachment {
                id: root_id,
                device: Some("/dev/vda".to_string()),
            }],
        );
        Ok(server)
    }

    fn get_server(&self, server_id: &str) -> Result<Server> {
        let state = self.state.lock().unwrap();
        state
            .servers
            .get(server_id)
            .cloned()
            .ok_or(CloudError::NotFound {
                kind: "server",
                name: server_id.to_string(),
            })
    }

    fn delete_server(&self, server_id: &str, force: bool) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(format!("delete_server {server_id} force={force}"));
        Self::check(&state, "delete_server")?;
        state.servers.remove(server_id);
        Ok(())
    }

    fn stop_server(&self, server_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("stop_server {server_id}"));
        Self::check(&state, "stop_server")?;
        if let Some(server) = state.servers.get_mut(server_id) {
            server.status = "SHUTOFF".to_string();
        }
        Ok(())
    }

    fn start_server(&self, server_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("start_server {server_id}"));
        Self::check(&state, "start_server")?;
        if let Some(server) = state.servers.get_mut(server_id) {
            server.status = "ACTIVE".to_string();
        }
        Ok(())
    }

    fn server_console_output(&self, _server_id: &str) -> Result<String> {
        let state = self.state.lock().unwrap();
        Self::check(&state, "server_console_output")?;
        Ok(state.console_output.clone())
    }

    fn server_console_url(&self, server_id: &str, console_type: &str) -> Result<String> {
        let state = self.state.lock().unwrap();
        Self::check(&state, "server_console_url")?;
        Ok(format!("https://console.example/{console_type}/{server_id}"))
    }

    fn change_server_password(&self, server_id: &str, _new_password: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("change_server_password {server_id}"));
        Self::check(&state, "change_server_password")
    }

    fn create_server_interface(&self, server_id: &str, network_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(format!("create_server_interface {server_id} {network_id}"));
        Self::check(&state, "create_server_interface")
    }

    fn volume_attachments(&self, server_id: &str) -> Result<Vec<VolumeAttachment>> {
        let state = self.state.lock().unwrap();
        Self::check(&state, "volume_attachments")?;
        Ok(state
            .attachments
            .get(server_id)
            .cloned()
            .unwrap_or_default())
    }

    fn attach_volume(&self, server_id: &str, volume_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(format!("attach_volume {server_id} {volume_id}"));
        Self::check(&state, "attach_volume")?;
        state
            .attachments
            .entry(server_id.to_string())
            .or_default()
            .push(VolumeAttachment {
                id: volume_id.to_string(),
                device: Some("/dev/vdb".to_string()),
            });
        Ok(())
    }

    fn find_flavor(&self, name: &str) -> Result<Flavor> {
        let state = self.state.lock().unwrap();
        state
            .flavors
            .iter()
            .find(|f| f.name == name)
            .cloned()
            .ok_or(CloudError::NotFound {
                kind: "flavor",
                name: name.to_string(),
            })
    }

    fn find_network(&self, name: &str) -> Result<Network> {
        let state = self.state.lock().unwrap();
        state
            .networks
            .iter()
            .find(|n| n.name == name)
            .cloned()
            .ok_or(CloudError::NotFound {
                kind: "network",
                name: name.to_string(),
            })
    }

    fn create_network(&self, name: &str) -> Result<Network> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("create_network {name}"));
        Self::check(&state, "create_network")?;
        let id = Self::id(&mut state, "net");
        let network = Network {
            id,
            name: name.to_string(),
        };
        state.networks.push(network.clone());
        Ok(network)
    }

    fn delete_network(&self, network_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("delete_network {network_id}"));
        Self::check(&state, "delete_network")
    }

    fn create_subnet(&self, name: &str, network_id: &str, cidr: &str) -> Result<Subnet> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(format!("create_subnet {name} {network_id} {cidr}"));
        Self::check(&state, "create_subnet")?;
        let id = Self::id(&mut state, "subnet");
        Ok(Subnet { id })
    }

    fn delete_subnet(&self, subnet_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("delete_subnet {subnet_id}"));
        Self::check(&state, "delete_subnet")
    }

    fn create_volume(&self, name: &str, size_gb: u32) -> Result<Volume> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("create_volume {name} {size_gb}"));
        Self::check(&state, "create_volume")?;
        let id = Self::id(&mut state, "vol");
        let volume = Volume {
            id: id.clone(),
            size_gb,
            status: "available".to_string(),
        };
        state.volumes.insert(id, volume.clone());
        Ok(volume)
    }

    fn get_volume(&self, volume_id: &str) -> Result<Volume> {
        let state = self.state.lock().unwrap();
        state
            .volumes
            .get(volume_id)
            .cloned()
            .ok_or(CloudError::NotFound {
                kind: "volume",
                name: volume_id.to_string(),
            })
    }

    fn delete_volume(&self, volume_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("delete_volume {volume_id}"));
        Self::check(&state, "delete_volume")?;
        state.volumes.remove(volume_id);
        Ok(())
    }

    fn extend_volume(&self, volume_id: &str, new_size_gb: u32) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(format!("extend_volume {volume_id} {new_size_gb}"));
        Self::check(&state, "extend_volume")?;
        match state.volumes.get_mut(volume_id) {
            Some(volume) => {
                volume.size_gb = new_size_gb;
                Ok(())
            }
            None => Err(CloudError::NotFound {
                kind: "volume",
                name: volume_id.to_string(),
            }),
        }
    }

    fn reset_volume_status(&self, volume_id: &str, status: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(format!("reset_volume_status {volume_id} {status}"));
        Self::check(&state, "reset_volume_status")?;
        if let Some(volume) = state.volumes.get_mut(volume_id) {
            volume.status = status.to_string();
        }
        Ok(())
    }
}
