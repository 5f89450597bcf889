mod bootstrap;
mod calendar;
mod config;
mod context;
mod core;
mod extractor;
mod feedback;
mod gate;
mod memory;
mod persons;
mod providers;
mod rate_limit;
mod reflection;
mod state;
mod traits;
mod types;
pub mod utils;

#[cfg(test)]
mod testing;

use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Load environment file.
    // - Default: .env discovered from current working directory and parents.
    // - Override: TERMINRADAR_ENV_FILE=/absolute/path/to/envfile
    if let Ok(path) = std::env::var("TERMINRADAR_ENV_FILE") {
        if !path.trim().is_empty() {
            if let Err(e) = dotenvy::from_path(&path) {
                eprintln!("Warning: failed to load TERMINRADAR_ENV_FILE '{}': {}", path, e);
            }
        } else {
            let _ = dotenvy::dotenv();
        }
    } else {
        let _ = dotenvy::dotenv();
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path =
        PathBuf::from(std::env::var("TERMINRADAR_CONFIG").unwrap_or_else(|_| "config.toml".into()));

    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 {
        match args[1].as_str() {
            "--version" | "-V" => {
                println!("terminradar {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" => {
                println!("terminradar {}", env!("CARGO_PKG_VERSION"));
                println!("{}\n", env!("CARGO_PKG_DESCRIPTION"));
                println!("Usage: terminradar [COMMAND]\n");
                println!("Commands:");
                println!("  (none)               Run the extraction daemon");
                println!("  reflect              Run one reflection cycle and exit");
                println!("  bootstrap <export>   Seed the memory service from a chat export file");
                println!("  reconcile            Repair drift between appointments and the remote calendar");
                println!("\nOptions:");
                println!("  -h, --help       Print help");
                println!("  -V, --version    Print version");
                return Ok(());
            }
            "reflect" => {
                let config = config::AppConfig::load(&config_path)?;
                return tokio::runtime::Builder::new_multi_thread()
                    .enable_all()
                    .build()?
                    .block_on(core::run_reflection_once(config));
            }
            "bootstrap" => {
                let export = args.get(2).map(PathBuf::from).unwrap_or_else(|| {
                    eprintln!("Usage: terminradar bootstrap <chat-export.txt>");
                    std::process::exit(1);
                });
                let config = config::AppConfig::load(&config_path)?;
                return tokio::runtime::Builder::new_multi_thread()
                    .enable_all()
                    .build()?
                    .block_on(bootstrap::run(config, export));
            }
            "reconcile" => {
                let config = config::AppConfig::load(&config_path)?;
                return tokio::runtime::Builder::new_multi_thread()
                    .enable_all()
                    .build()?
                    .block_on(core::run_reconcile(config));
            }
            other => {
                eprintln!("Unknown command: '{}'. See --help.", other);
                std::process::exit(1);
            }
        }
    }

    let config = config::AppConfig::load(&config_path)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(core::run(config))
}
