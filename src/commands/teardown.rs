use anyhow::Result;

use crate::Context;
use crate::cli::TeardownArgs;
use crate::cloud::openstack::OpenStackClient;
use crate::config::AuthConfig;
use crate::resources::ResourceSet;
use crate::teardown::Reaper;
use crate::ui;

pub fn run(_ctx: &Context, args: TeardownArgs) -> Result<()> {
    ui::header("Delete resources");

    let set = ResourceSet::load(&args.env_file)?;
    let auth = AuthConfig::from_env()?;
    let client = OpenStackClient::connect(&auth)?;

    match Reaper::new(&client).teardown(&set) {
        Ok(()) => {
            ui::success("all resources deleted");
            Ok(())
        }
        Err(e) => {
            for (what, cause) in &e.failures {
                ui::error(&format!("{what}: {cause}"));
            }
            Err(e.into())
        }
    }
}
