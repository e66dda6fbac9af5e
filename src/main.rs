//! cloudlens binary entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cloudlens_rs::app::App;
use cloudlens_rs::config::{generate_sample_config, ConfigLoader};
use cloudlens_rs::logging::init_logging;
use cloudlens_rs::nlq::ChatRequest;
use cloudlens_rs::server;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "cloudlens")]
#[command(version, about = "Behavioral analytics and natural-language querying for AWS security logs", long_about = None)]
struct Cli {
    /// Configuration file (defaults to cloudlens.toml if present)
    #[arg(short, long, env = "CLOUDLENS_CONFIG")]
    config: Option<String>,

    /// Override the log level (e.g. debug, cloudlens_rs=trace)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve {
        /// Bind address, overrides the configured one
        #[arg(long)]
        bind: Option<String>,
    },

    /// Build a behavior profile for one identity
    Analyze {
        #[arg(long)]
        user_arn: String,

        /// Look-back window in days (1-90)
        #[arg(long)]
        days: Option<u32>,
    },

    /// Scan the whole account for anomalies
    Scan {
        /// Look-back window in days (1-90)
        #[arg(long, default_value = "1")]
        days: u32,
    },

    /// Ask a question about the security logs
    Ask {
        question: String,

        #[arg(long)]
        model_id: Option<String>,
    },

    /// Write a sample configuration file
    GenerateConfig {
        #[arg(default_value = "cloudlens.toml")]
        path: PathBuf,
    },
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::GenerateConfig { path } = &cli.command {
        generate_sample_config(path)?;
        println!("Sample configuration written to {}", path.display());
        return Ok(());
    }

    let mut config = ConfigLoader::new()
        .load_from_file(cli.config.as_deref())
        .load_from_env()
        .build()?;
    if let Some(level) = &cli.log_level {
        config.log.level = level.clone();
    }
    let _guard = init_logging(&config.log)?;

    let app = App::from_config(config)
        .await
        .context("Failed to initialize components")?;

    match cli.command {
        Commands::Serve { bind } => {
            let mut server_config = app.config.server.clone();
            if let Some(bind) = bind {
                server_config.bind_addr = bind;
            }
            info!(version = env!("CARGO_PKG_VERSION"), "starting cloudlens");
            server::serve(app.state(), &server_config).await?;
        }
        Commands::Analyze { user_arn, days } => {
            print_json(&app.analytics.analyze_user(&user_arn, days).await?)?;
        }
        Commands::Scan { days } => {
            print_json(&app.analytics.detect_anomalies(Some(days)).await?)?;
        }
        Commands::Ask { question, model_id } => {
            let request = ChatRequest {
                question,
                model_id,
                ..Default::default()
            };
            let response = app.pipeline.ask(&request).await?;
            println!("{}", response.answer);
        }
        Commands::GenerateConfig { .. } => {}
    }

    Ok(())
}
