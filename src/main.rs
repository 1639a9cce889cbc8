use clap::Parser;
use log::{error, info};
use ruche::configuration::config::Config;
use ruche::controller::controller_handler::Controller;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ruche")]
#[command(version)]
#[command(about = "A low-interaction multi-protocol honeypot")]
struct Args {
    /// TOML configuration file. When given, it replaces the flags and environment variables.
    #[arg(long, env = "RUCHE_CONFIG")]
    config_file: Option<PathBuf>,

    #[command(flatten)]
    config: Config,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let (config, imported) = match args.config_file {
        Some(path) => match Config::from_file(&path) {
            Ok(config) => (config, Some(path)),
            Err(e) => {
                ruche::logging::init(None);
                error!("Unable to import configuration from file: {}", e);
                std::process::exit(1);
            }
        },
        None => (args.config, None),
    };

    ruche::logging::init(Some(&config.app_log_path));

    println!(
        "
██████╗ ██╗   ██╗ ██████╗██╗  ██╗███████╗
██╔══██╗██║   ██║██╔════╝██║  ██║██╔════╝
██████╔╝██║   ██║██║     ███████║█████╗
██╔══██╗██║   ██║██║     ██╔══██║██╔══╝
██║  ██║╚██████╔╝╚██████╗██║  ██║███████╗
╚═╝  ╚═╝ ╚═════╝  ╚═════╝╚═╝  ╚═╝╚══════╝
==========================================
   Low-interaction honeypot v{}
==========================================
",
        env!("CARGO_PKG_VERSION")
    );

    if let Some(path) = imported {
        info!("Imported configuration from {}", path.display());
    }

    let controller = Controller::new(config).unwrap_or_else(|e| {
        error!("Unable to create a controller instance: {}, exiting...", e);
        std::process::exit(1);
    });

    if let Err(e) = controller.run().await {
        error!("Error occurred in the controller process: {}, exiting...", e);
        std::process::exit(1);
    }
}
