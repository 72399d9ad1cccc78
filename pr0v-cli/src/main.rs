use clap::Parser;
use pr0v_cli::commands::{ProvisionArgs, handle_provision};

/// Install the OS and Python packages a project needs, skipping what is already there
#[derive(Debug, Parser)]
#[clap(name = "pr0v", version, about)]
struct Cli {
    #[clap(flatten)]
    provision: ProvisionArgs,

    /// Debug logging (RUST_LOG still takes precedence)
    #[clap(short, long)]
    verbose: bool,
}

/// Exit code for errors raised before provisioning starts
const USAGE_ERROR: i32 = 2;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let code = match handle_provision(cli.provision).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("❌ {e:#}");
            USAGE_ERROR
        }
    };
    std::process::exit(code);
}
