//! Deploy Console - Entry Point
//!
//! Watches the deployments of one project and keeps a reconciled, live list of
//! them for the console UI.

use std::collections::HashMap;
use std::env;

use anyhow::Context;
use deploy_console::app::options::AppOptions;
use deploy_console::app::run::run;
use deploy_console::filesys::file::File;
use deploy_console::logs::{init_logging, LogOptions};
use deploy_console::storage::layout::StorageLayout;
use deploy_console::storage::settings::Settings;
use deploy_console::utils::version_info;

use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", version.version),
        }
        return;
    }

    let layout = StorageLayout::default();
    let settings = match load_settings(&layout, &cli_args).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to load settings: {e:#}");
            std::process::exit(1);
        }
    };

    // Initialize logging
    let log_dir = match (&settings.log.dir, settings.log.file) {
        (Some(dir), _) => Some(dir.clone()),
        (None, true) => Some(layout.logs_dir().path().to_path_buf()),
        (None, false) => None,
    };
    let log_options = LogOptions {
        log_level: settings.log.level.clone(),
        log_dir,
        json_format: settings.log.json,
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    let options = match AppOptions::from_settings(&settings, layout) {
        Ok(options) => options,
        Err(e) => {
            error!("Invalid settings: {e}");
            std::process::exit(1);
        }
    };

    info!("Running deploy console {} with options: {:?}", version.version, options);
    if let Err(e) = run(options, await_shutdown_signal()).await {
        error!("Failed to run the deploy console: {e}");
        std::process::exit(1);
    }
}

async fn load_settings(
    layout: &StorageLayout,
    cli_args: &HashMap<String, String>,
) -> anyhow::Result<Settings> {
    let settings_file = match cli_args.get("settings") {
        Some(path) => File::new(path),
        None => layout.settings_file(),
    };

    let mut settings = if settings_file.exists().await {
        settings_file
            .read_json::<Settings>()
            .await
            .with_context(|| format!("reading {}", settings_file.path().display()))?
    } else {
        Settings::default()
    };

    if let Some(project) = cli_args.get("project") {
        settings.project.id = project.clone();
    }
    Ok(settings)
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                _ => {
                    error!("Failed to install signal handlers, falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
        }
        info!("Ctrl+C received, shutting down...");
    }
}
