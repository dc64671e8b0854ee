//! Resource teardown for one staging run.
//!
//! Deletes in reverse dependency order where it matters: the subnet
//! always goes before its network. A resource that is already gone
//! counts as deleted, and a genuine deletion failure never stops the
//! remaining deletions; it is collected and reported at the end.

use crate::cloud::{CloudClient, CloudError, wait_for_server_deleted};
use crate::resources::ResourceSet;
use crate::retry::PollConfig;
use std::time::Duration;
use thiserror::Error;

/// Server deletion budget: 30 attempts, 2 s apart.
const DELETE_ATTEMPTS: u32 = 30;
const DELETE_INTERVAL: Duration = Duration::from_secs(2);

/// One or more deletions genuinely failed (not-found does not count).
#[derive(Debug, Error)]
#[error("{} of {attempted} deletions failed", .failures.len())]
pub struct TeardownError {
    pub attempted: usize,
    pub failures: Vec<(String, CloudError)>,
}

pub struct Reaper<'a> {
    client: &'a dyn CloudClient,
}

impl<'a> Reaper<'a> {
    pub fn new(client: &'a dyn CloudClient) -> Self {
        Self { client }
    }

    /// Delete everything in the set. Idempotent from the caller's
    /// perspective: re-running on a half-deleted set succeeds.
    pub fn teardown(&self, set: &ResourceSet) -> Result<(), TeardownError> {
        let mut failures: Vec<(String, CloudError)> = Vec::new();
        let mut attempted = 0usize;

        let mut attempt = |what: String, result: Result<(), CloudError>| {
            attempted += 1;
            match result {
                Ok(()) => log::info!("{what} is deleted"),
                Err(e) if e.is_not_found() => log::info!("{what} was already gone"),
                Err(e) => {
                    log::error!("could not delete {what}: {e}");
                    failures.push((what, e));
                }
            }
        };

        attempt(
            format!("image {}", set.image_id),
            self.client.delete_image(&set.image_id),
        );
        attempt(
            format!("server {}", set.server_id),
            self.delete_server(&set.server_id),
        );
        attempt(
            format!("keypair {}", set.keypair_id),
            self.client.delete_keypair(&set.keypair_id),
        );
        attempt(
            format!("subnet {}", set.subnet_id),
            self.client.delete_subnet(&set.subnet_id),
        );
        attempt(
            format!("network {}", set.network_id),
            self.client.delete_network(&set.network_id),
        );
        attempt(
            format!("extra volume {}", set.extra_volume_id),
            self.client.delete_volume(&set.extra_volume_id),
        );

        if failures.is_empty() {
            Ok(())
        } else {
            Err(TeardownError {
                attempted,
                failures,
            })
        }
    }

    /// Force-delete the server and block until the provider agrees it
    /// is gone; the root volume has delete_on_termination set and goes
    /// with it.
    fn delete_server(&self, server_id: &str) -> Result<(), CloudError> {
        self.client.delete_server(server_id, true)?;
        wait_for_server_deleted(
            self.client,
            server_id,
            PollConfig::new(DELETE_ATTEMPTS, DELETE_INTERVAL),
        )
    }
}
