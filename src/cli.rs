use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "vmstage")]
#[command(version)]
#[command(about = "Stage, validate and reclaim throwaway VM test infrastructure", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Provision image, keypair, server, private network and extra volume
    Stage(StageArgs),

    /// Run the validation checks against the staged VM
    Verify(VerifyArgs),

    /// Delete everything a staging run created
    Teardown(TeardownArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser)]
pub struct StageArgs {
    /// Where to write the resource ids for the later stages
    #[arg(long, env = "STAGE_ENV_FILE", default_value = "stage.env")]
    pub env_file: PathBuf,
}

#[derive(Parser)]
pub struct VerifyArgs {
    /// Resource ids written by the stage step
    #[arg(long, env = "STAGE_ENV_FILE", default_value = "stage.env")]
    pub env_file: PathBuf,
}

#[derive(Parser)]
pub struct TeardownArgs {
    /// Resource ids written by the stage step
    #[arg(long, env = "STAGE_ENV_FILE", default_value = "stage.env")]
    pub env_file: PathBuf,
}
