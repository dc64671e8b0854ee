//! Persisted resource identifiers for one staging run.
//!
//! The provisioner writes the set once; the verify and teardown stages
//! read it back. The on-disk format is one `KEY=VALUE` per line so the
//! surrounding CI pipeline can source it directly.

use anyhow::{Context, Result, bail};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Ids and derived coordinates of everything one staging run created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSet {
    pub image_id: String,
    pub server_id: String,
    pub keypair_id: String,
    pub network_id: String,
    pub subnet_id: String,
    pub extra_volume_id: String,
    pub server_username: String,
    pub server_name: String,
    pub server_ip: String,
}

const KEYS: [&str; 9] = [
    "IMAGE_ID",
    "SERVER_ID",
    "SERVER_USERNAME",
    "SERVER_IP",
    "KEYPAIR_ID",
    "SERVER_NAME",
    "NETWORK_ID",
    "SUBNET_ID",
    "EXTRA_VOLUME_ID",
];

impl ResourceSet {
    fn pairs(&self) -> [(&'static str, &str); 9] {
        [
            ("IMAGE_ID", &self.image_id),
            ("SERVER_ID", &self.server_id),
            ("SERVER_USERNAME", &self.server_username),
            ("SERVER_IP", &self.server_ip),
            ("KEYPAIR_ID", &self.keypair_id),
            ("SERVER_NAME", &self.server_name),
            ("NETWORK_ID", &self.network_id),
            ("SUBNET_ID", &self.subnet_id),
            ("EXTRA_VOLUME_ID", &self.extra_volume_id),
        ]
    }

    /// Write the flat KEY=VALUE file consumed by later pipeline stages.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut out = String::new();
        for (key, value) in self.pairs() {
            out.push_str(key);
            out.push('=');
            out.push_str(value);
            out.push('\n');
        }
        fs::write(path, out).with_context(|| format!("could not write {}", path.display()))?;
        Ok(())
    }

    /// Read a previously saved set. All keys must be present and
    /// non-empty; unknown keys are ignored.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("could not read {}", path.display()))?;
        let mut values: HashMap<&str, &str> = HashMap::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                bail!("malformed line {line:?} in {}", path.display());
            };
            values.insert(key, value);
        }
        for key in KEYS {
            match values.get(key) {
                Some(value) if !value.is_empty() => {}
                _ => bail!("{} is missing {key}", path.display()),
            }
        }
        Ok(Self {
            image_id: values["IMAGE_ID"].to_string(),
            server_id: values["SERVER_ID"].to_string(),
            server_username: values["SERVER_USERNAME"].to_string(),
            server_ip: values["SERVER_IP"].to_string(),
            keypair_id: values["KEYPAIR_ID"].to_string(),
            server_name: values["SERVER_NAME"].to_string(),
            network_id: values["NETWORK_ID"].to_string(),
            subnet_id: values["SUBNET_ID"].to_string(),
            extra_volume_id: values["EXTRA_VOLUME_ID"].to_string(),
        })
    }
}
