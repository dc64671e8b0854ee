use anyhow::Result;

use crate::Context;
use crate::cli::StageArgs;
use crate::cloud::openstack::OpenStackClient;
use crate::config::{AuthConfig, ImageProperties, StageConfig};
use crate::provision::Provisioner;
use crate::ui;

pub fn run(ctx: &Context, args: StageArgs) -> Result<()> {
    ui::header("Stage resources");

    let auth = AuthConfig::from_env()?;
    let config = StageConfig::from_env()?;
    let properties = ImageProperties::load(&config.properties_path)?;

    let client = OpenStackClient::connect(&auth)?;
    let set = Provisioner::new(&client, &config, &properties).stage(&args.env_file)?;

    ui::success(&format!(
        "staged, resource ids written to {}",
        args.env_file.display()
    ));
    if !ctx.quiet {
        ui::kv("image", &set.image_id);
        ui::kv("server", &set.server_id);
        ui::kv("server ip", &set.server_ip);
        ui::kv("network", &set.network_id);
        ui::kv("extra volume", &set.extra_volume_id);
    }
    Ok(())
}
