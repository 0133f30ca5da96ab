use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Deserialize;

use slipway::deployer::DeploymentOrchestrator;
use slipway_core::models::{Application, DatabaseRecord, GitCredential};
use slipway_core::store::{MemoryAppStore, ScriptedProvisioner};
use slipway_core::{SecretCodec, Settings};

#[derive(Parser)]
#[command(
    name = "slipway",
    about = "self-hosted deployment controller",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one deployment of the application described by a definition file
    Deploy {
        /// JSON definition: application plus optional credential/database
        #[arg(long)]
        app_file: PathBuf,
    },
    /// Remove the working directory of the application in a definition file
    Clean {
        #[arg(long)]
        app_file: PathBuf,
    },
    /// Encrypt a token or password for at-rest storage in a definition file
    Encrypt {
        value: String,
    },
}

/// One-shot deployment input: the records the excluded CRUD layer would
/// normally hold.
#[derive(Deserialize)]
struct Definition {
    application: Application,
    #[serde(default)]
    credential: Option<GitCredential>,
    #[serde(default)]
    database: Option<DatabaseRecord>,
}

fn load_definition(path: &PathBuf) -> anyhow::Result<(MemoryAppStore, String)> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read definition file {}", path.display()))?;
    let definition: Definition =
        serde_json::from_str(&raw).context("parse definition file")?;

    let store = MemoryAppStore::new();
    let app_id = definition.application.id.clone();

    store.insert_application(definition.application)?;
    if let Some(credential) = definition.credential {
        store.insert_credential(credential)?;
    }
    if let Some(database) = definition.database {
        store.insert_database(database)?;
    }

    Ok((store, app_id))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env();

    match cli.command {
        Commands::Encrypt { value } => {
            let codec = SecretCodec::new(&settings.secret_passphrase);
            println!("{}", codec.encrypt(&value)?);
            Ok(())
        }
        Commands::Deploy { app_file } => {
            let (store, app_id) = load_definition(&app_file)?;
            let orchestrator = DeploymentOrchestrator::new(
                Arc::new(store),
                Arc::new(ScriptedProvisioner::unavailable()),
                settings,
            );

            let outcome = orchestrator.deploy(&app_id).await;
            print!("{}", outcome.logs);

            if !outcome.success {
                anyhow::bail!("{}", outcome.message);
            }
            Ok(())
        }
        Commands::Clean { app_file } => {
            let (store, app_id) = load_definition(&app_file)?;
            let orchestrator = DeploymentOrchestrator::new(
                Arc::new(store),
                Arc::new(ScriptedProvisioner::unavailable()),
                settings,
            );

            let outcome = orchestrator.clean(&app_id).await;
            print!("{}", outcome.logs);

            if !outcome.success {
                anyhow::bail!("{}", outcome.message);
            }
            Ok(())
        }
    }
}
