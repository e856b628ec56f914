use std::env;

use tracing_subscriber::EnvFilter;

const USAGE: &str = "Usage: ticketflow serve --config <path> | ticketflow verify-audit <path>";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = env::args().skip(1);
    let cmd = args.next().unwrap_or_default();
    match cmd.as_str() {
        "serve" => serve(args).await,
        "verify-audit" => {
            let Some(path) = args.next() else {
                eprintln!("{USAGE}");
                std::process::exit(2);
            };
            match ticketflow_server::verify_audit_chain(&path) {
                Ok(summary) => println!("{summary}"),
                Err(e) => {
                    eprintln!("verify-audit {path}: {e}");
                    std::process::exit(1);
                }
            }
        }
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    }
}

async fn serve(mut args: impl Iterator<Item = String>) {
    let mut config_path = String::from("./config/example-config.yaml");
    while let Some(arg) = args.next() {
        if arg == "--config" {
            if let Some(v) = args.next() {
                config_path = v;
            }
        }
    }

    let cfg = match ticketflow_config::load_and_validate(&config_path) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(path = %config_path, error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "ctrl-c handler failed");
        }
        tracing::info!("shutdown requested");
    };
    if let Err(e) = ticketflow_server::serve(cfg, shutdown).await {
        tracing::error!(error = %e, "server exited with error");
        std::process::exit(1);
    }
}
