use clap::Parser;
use hostdeck::app::App;
use hostdeck::services::logger::{LogLevel, Logger};
use hostdeck::services::settings::Settings;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "hostdeck")]
#[command(about = "Remote host files and deployments over a JSON-lines console", long_about = None)]
struct Cli {
    /// Host inventory file (overrides HOSTDECK_INVENTORY)
    #[arg(long)]
    inventory: Option<PathBuf>,

    /// error, warn, info or debug (overrides HOSTDECK_LOG_LEVEL)
    #[arg(long)]
    log_level: Option<String>,

    /// Remote deployment root (overrides HOSTDECK_DEPLOY_ROOT)
    #[arg(long)]
    deploy_root: Option<String>,

    /// Items processed at once by batch operations
    #[arg(long)]
    batch_concurrency: Option<usize>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let logger = match cli.log_level.as_deref().map(LogLevel::parse) {
        Some(Some(level)) => Logger::with_level("hostdeck", level),
        Some(None) => {
            eprintln!("hostdeck: unknown log level, expected error|warn|info|debug");
            std::process::exit(2);
        }
        None => Logger::new("hostdeck"),
    };

    let mut settings = Settings::from_env();
    if let Some(path) = cli.inventory {
        settings.inventory_path = path;
    }
    if let Some(root) = cli.deploy_root {
        if !root.starts_with('/') {
            eprintln!("hostdeck: --deploy-root must be an absolute path");
            std::process::exit(2);
        }
        settings.deploy_root = root.trim_end_matches('/').to_string();
    }
    if let Some(n) = cli.batch_concurrency {
        settings.batch_concurrency = n.max(1);
    }

    let app = match App::initialize(logger.clone(), settings) {
        Ok(app) => app,
        Err(err) => {
            eprintln!("hostdeck: {}", err);
            std::process::exit(1);
        }
    };
    let result = hostdeck::transport::console::run_stdio(logger.clone(), &app.dispatcher).await;
    logger.debug("Shutdown", Some(&app.stats()));
    if let Err(err) = result {
        eprintln!("hostdeck: {}", err);
        std::process::exit(1);
    }
}
