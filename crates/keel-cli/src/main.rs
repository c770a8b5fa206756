mod cli;
mod config;
mod storage;

use crate::cli::ConfigCommand;
use clap::Parser;
use color_eyre::Result;
use keel_core::storage::SecureStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Entry point wiring the CLI to the encrypted store.
#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load()?;
    let namespace = cli.namespace.as_deref();
    match cli.command.unwrap_or(cli::Command::Info) {
        cli::Command::Info => print_info(&config, namespace).await?,
        cli::Command::Version => print_version(),
        cli::Command::Health => run_health_check(&config, namespace).await?,
        cli::Command::Config(ConfigCommand::Init) => init_config(&config)?,
    }

    Ok(())
}

fn init_tracing() {
    // Logs go to stderr so `info` output stays machine readable.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("keel {}", env!("CARGO_PKG_VERSION"));
}

async fn print_info(config: &config::Config, namespace: Option<&str>) -> Result<()> {
    let store = storage::vault_from_config(config, namespace).await?;
    println!("{}", serde_json::to_string_pretty(&store.store_info())?);
    Ok(())
}

/// Runs a quick health check of the encrypted storage paths.
async fn run_health_check(config: &config::Config, namespace: Option<&str>) -> Result<()> {
    let store = storage::vault_from_config(config, namespace).await?;
    run_store_health(&store).await?;
    println!("Storage: ok");
    Ok(())
}

async fn run_store_health<S: SecureStore>(store: &S) -> Result<()> {
    let probe = "keel.health.probe";
    let payload = b"ok";

    store.put_string(probe, "ok").await?;
    let value = store.get_string(probe).await?;
    store.remove_string(probe).await?;
    if value.as_deref() != Some("ok") {
        color_eyre::eyre::bail!("preference round-trip failed");
    }

    store.save_blob(probe, payload.to_vec()).await?;
    let blob = store.read_blob(probe).await?;
    store.delete_blob(probe).await?;
    if blob.as_deref() != Some(payload.as_slice()) {
        color_eyre::eyre::bail!("blob round-trip failed");
    }
    Ok(())
}

fn init_config(config: &config::Config) -> Result<()> {
    let path = config::write_default_if_missing(config)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage;

    #[tokio::test]
    async fn health_check_with_test_store_succeeds() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = storage::test_store(dir.path()).await;
        run_store_health(&store)
            .await
            .expect("health check should succeed");
        assert!(store.list_keys().await.unwrap().is_empty());
        assert!(store.list_blob_names().await.unwrap().is_empty());
    }
}
