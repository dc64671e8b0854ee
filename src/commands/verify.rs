use anyhow::Result;
use std::process;

use crate::Context;
use crate::cli::VerifyArgs;
use crate::cloud::openstack::OpenStackClient;
use crate::config::{AuthConfig, SshEndpoint};
use crate::harness::VmValidationHarness;
use crate::resources::ResourceSet;
use crate::ssh::{BastionSession, SshError};
use crate::ui;

/// Exit code for SSH establishment exhaustion, distinct from ordinary
/// check failures so the pipeline can tell the two apart.
const EXIT_SSH_UNREACHABLE: i32 = 2;

pub fn run(ctx: &Context, args: VerifyArgs) -> Result<()> {
    let set = ResourceSet::load(&args.env_file)?;
    let auth = AuthConfig::from_env()?;
    let endpoint = SshEndpoint::from_env(&set.server_username, &set.server_ip)?;

    let client = OpenStackClient::connect(&auth)?;
    let mut session = match BastionSession::connect(&endpoint) {
        Ok(session) => session,
        Err(e @ SshError::Exhausted { .. }) => {
            ui::error(&e.to_string());
            process::exit(EXIT_SSH_UNREACHABLE);
        }
        Err(e) => return Err(e.into()),
    };

    ui::header(&format!("Validate {}", set.server_name));
    let results = VmValidationHarness::new(&mut session, &client, &set).run_all();

    let mut failed = 0;
    for result in &results {
        ui::check(result.name, result.passed, &result.detail);
        if result.passed && ctx.verbose > 0 {
            ui::kv("output", &result.detail);
        }
        if !result.passed {
            failed += 1;
        }
    }

    println!();
    if failed == 0 {
        ui::success(&format!("all {} checks passed", results.len()));
        Ok(())
    } else {
        ui::error(&format!("{failed} of {} checks failed", results.len()));
        process::exit(1);
    }
}
