//! Validation checks run against the provisioned VM.
//!
//! Each check mirrors one smoke test: it drives the VM over the
//! bastion session and, for the dynamic ones, the cloud API. A failed
//! assertion or a transient probe error is recorded and the run
//! continues; nothing here mutates the [`ResourceSet`].
//!
//! The probe-style checks keep their historic sentinel return values
//! ("-1", "ERROR") at the public method boundary because the CI jobs
//! consuming the output grep for them; internally everything is typed.

use crate::cloud::{CloudClient, CloudError, wait_for_server_status};
use crate::resources::ResourceSet;
use crate::retry::{PollConfig, poll_until};
use crate::ssh::{RemoteRunner, SshError};
use rand::Rng;
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// Root volume growth applied by the resize check.
pub const RESIZE_INCREMENT_GB: u32 = 7;
/// Sentinel for probe checks that ran out of attempts.
pub const PROBE_FAILED: &str = "-1";
/// Sentinel for a failed password rotation.
pub const PASSWORD_FAILED: &str = "ERROR";

const PASSWORD_LEN: usize = 8;
const LETTERS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Ssh(#[from] SshError),

    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error("server {server_id} has no root volume distinct from the extra volume")]
    NoRootVolume { server_id: String },
}

/// Outcome of one check.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

/// Waits and settle delays used by the checks. Production values by
/// default; tests shrink them.
#[derive(Debug, Clone)]
pub struct Timing {
    /// Delay after attaching an interface before the first in-VM probe
    pub interface_settle: Duration,
    /// In-VM probe budget for the new interface
    pub interface_poll: PollConfig,
    /// Delay after attaching a volume before listing block devices
    pub volume_settle: Duration,
    /// Budget for the server to reach SHUTOFF/ACTIVE around the resize
    pub state_wait: PollConfig,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            interface_settle: Duration::from_secs(20),
            interface_poll: PollConfig::new(5, Duration::from_secs(10)),
            volume_settle: Duration::from_secs(10),
            state_wait: PollConfig::new(30, Duration::from_secs(2)),
        }
    }
}

pub struct VmValidationHarness<'a> {
    runner: &'a mut dyn RemoteRunner,
    cloud: &'a dyn CloudClient,
    set: &'a ResourceSet,
    timing: Timing,
}

impl<'a> VmValidationHarness<'a> {
    pub fn new(
        runner: &'a mut dyn RemoteRunner,
        cloud: &'a dyn CloudClient,
        set: &'a ResourceSet,
    ) -> Self {
        Self::with_timing(runner, cloud, set, Timing::default())
    }

    pub fn with_timing(
        runner: &'a mut dyn RemoteRunner,
        cloud: &'a dyn CloudClient,
        set: &'a ResourceSet,
        timing: Timing,
    ) -> Self {
        Self {
            runner,
            cloud,
            set,
            timing,
        }
    }

    /// Names of the IPv4 interfaces, one per line.
    pub fn interface_names(&mut self) -> Result<String, SshError> {
        let output = self.runner.run("/usr/sbin/ip -4 -o a | awk '{print $2}'")?;
        Ok(output.stdout.trim().to_string())
    }

    pub fn hostname(&mut self) -> Result<String, SshError> {
        let output = self.runner.run("hostname")?;
        Ok(output.stdout.trim().to_string())
    }

    /// External connectivity probe. A failing or erroring ping is not
    /// worth aborting the run over, so this converts errors into the
    /// sentinel.
    pub fn ping_internet(&mut self) -> String {
        match self.runner.run("ping -c 5 google.com") {
            Ok(output) => output.stdout.trim().to_string(),
            Err(_) => PROBE_FAILED.to_string(),
        }
    }

    pub fn partition_table(&mut self) -> Result<String, SshError> {
        let output = self.runner.run("/usr/sbin/gdisk -l")?;
        Ok(output.stdout.trim().to_string())
    }

    pub fn console_log(&self) -> Result<String, CloudError> {
        self.cloud.server_console_output(&self.set.server_id)
    }

    /// Attach the private network to the running server, then wait for
    /// the new interface to show up inside the VM. Exhaustion returns
    /// the sentinel, not an error; only the attach call itself can
    /// fail.
    pub fn add_server_to_private_network(&mut self) -> Result<String, CloudError> {
        self.cloud
            .create_server_interface(&self.set.server_id, &self.set.network_id)?;
        thread::sleep(self.timing.interface_settle);

        let runner = &mut self.runner;
        let line = poll_until("eth1 inside the VM", self.timing.interface_poll, || {
            match runner.run_unchecked("/usr/sbin/ip a | grep eth1") {
                Ok(output) if output.succeeded() && !output.stdout.trim().is_empty() => {
                    Some(output.stdout.trim().to_string())
                }
                _ => None,
            }
        });
        Ok(line.unwrap_or_else(|_| PROBE_FAILED.to_string()))
    }

    /// Attach the pre-created extra volume and report the new block
    /// device line.
    pub fn add_extra_volume_to_server(&mut self) -> Result<String, HarnessError> {
        self.cloud
            .attach_volume(&self.set.server_id, &self.set.extra_volume_id)?;
        thread::sleep(self.timing.volume_settle);
        let output = self.runner.run("lsblk | grep vdb")?;
        Ok(output.stdout.trim().to_string())
    }

    /// Grow the root volume by [`RESIZE_INCREMENT_GB`] through a full
    /// stop/extend/start cycle and report the new size plus the root
    /// device line as seen from inside the VM.
    pub fn resize_server(&mut self) -> Result<(u32, String), HarnessError> {
        let server_id = &self.set.server_id;

        self.cloud.stop_server(server_id)?;
        wait_for_server_status(self.cloud, server_id, "SHUTOFF", self.timing.state_wait)?;

        // The root volume is the one attachment that is not the extra
        // volume created at staging time.
        let root_volume_id = self
            .cloud
            .volume_attachments(server_id)?
            .into_iter()
            .map(|a| a.id)
            .find(|id| id != &self.set.extra_volume_id)
            .ok_or_else(|| HarnessError::NoRootVolume {
                server_id: server_id.clone(),
            })?;

        let root_volume = self.cloud.get_volume(&root_volume_id)?;
        let new_size = root_volume.size_gb + RESIZE_INCREMENT_GB;

        // The volume still counts as attached to the stopped server;
        // its state has to be cleared before cinder accepts the extend.
        self.cloud.reset_volume_status(&root_volume_id, "available")?;
        self.cloud.extend_volume(&root_volume_id, new_size)?;

        self.cloud.start_server(server_id)?;
        wait_for_server_status(self.cloud, server_id, "ACTIVE", self.timing.state_wait)?;

        // The reboot killed the old session.
        self.runner.reconnect()?;

        let output = self.runner.run("lsblk | grep vda")?;
        Ok((new_size, output.stdout.trim().to_string()))
    }

    /// Rotate the login password and report it, or the sentinel if the
    /// provider refused. Never raises.
    pub fn change_server_password(&mut self) -> String {
        let password = generate_password();
        let result = self
            .cloud
            .change_server_password(&self.set.server_id, &password)
            .and_then(|()| self.cloud.server_console_url(&self.set.server_id, "novnc"));
        match result {
            Ok(console_url) => {
                log::info!("password {password} is set on server");
                log::info!("console url for server {}: {console_url}", self.set.server_id);
                password
            }
            Err(e) => {
                log::warn!("password rotation failed: {e}");
                PASSWORD_FAILED.to_string()
            }
        }
    }

    /// Run every check in order, recording each outcome. Check
    /// failures never stop the sequence.
    pub fn run_all(&mut self) -> Vec<ValidationResult> {
        let expected_hostname = self.set.server_name.to_lowercase().replace('.', "-");
        let expected_extra = format!("{}G", crate::provision::EXTRA_VOLUME_SIZE_GB);

        let mut results = Vec::new();
        let mut record = |name: &'static str, outcome: Result<(bool, String), String>| {
            let (passed, detail) = match outcome {
                Ok((passed, detail)) => (passed, detail),
                Err(message) => (false, message),
            };
            results.push(ValidationResult {
                name,
                passed,
                detail,
            });
        };

        record(
            "interface_names",
            self.interface_names()
                .map(|names| (names.contains("eth0"), names))
                .map_err(|e| e.to_string()),
        );
        record(
            "hostname",
            self.hostname()
                .map(|h| (h.contains(&expected_hostname), h))
                .map_err(|e| e.to_string()),
        );
        let ping = self.ping_internet();
        record(
            "internet_connectivity",
            Ok((ping.contains("0% packet loss"), ping)),
        );
        record(
            "partition_table",
            self.partition_table()
                .map(|pt| (pt.contains("GPT"), pt))
                .map_err(|e| e.to_string()),
        );
        record(
            "console_log",
            self.console_log()
                .map(|log| (log.contains("cloud-init"), "console output".to_string()))
                .map_err(|e| e.to_string()),
        );
        record(
            "private_network_interface",
            self.add_server_to_private_network()
                .map(|line| (line.contains("eth1") && line.contains(" UP "), line))
                .map_err(|e| e.to_string()),
        );
        record(
            "extra_volume_attachment",
            self.add_extra_volume_to_server()
                .map(|line| {
                    (
                        line.contains("vdb") && line.contains(&expected_extra),
                        line,
                    )
                })
                .map_err(|e| e.to_string()),
        );
        record(
            "server_resize",
            self.resize_server()
                .map(|(new_size, line)| {
                    let wanted = format!("{new_size}G");
                    (line.contains("vda") && line.contains(&wanted), line)
                })
                .map_err(|e| e.to_string()),
        );
        let password = self.change_server_password();
        record(
            "password_rotation",
            Ok((password != PASSWORD_FAILED, password)),
        );

        results
    }
}

fn generate_password() -> String {
    let mut rng = rand::thread_rng();
    (0..PASSWORD_LEN)
        .map(|_| LETTERS[rng.gen_range(0..LETTERS.len())] as char)
        .collect()
}
