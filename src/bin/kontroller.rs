//! `kontroller`: runs the bundled configmap reloader until a termination signal.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use kontroller::client::ConnectionConfig;
use kontroller::controllers::{DEFAULT_LABEL_SELECTOR, RELOADER_NAME, Reloader};
use kontroller::{Config, LogWriter, Manager, Subscribe};

/// Minimal controller-manager.
#[derive(Parser, Debug)]
#[command(name = "kontroller", version, about)]
struct Cli {
    /// Kubeconfig used when not running inside a cluster.
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Settings file; searched for as `config.yaml` when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Namespace watched by the reloader (all when empty).
    #[arg(long, default_value = "")]
    namespace: String,

    /// Label selector of the reloader.
    #[arg(long, default_value = DEFAULT_LABEL_SELECTOR)]
    selector: String,

    /// Registry name of the reloader.
    #[arg(long, default_value = RELOADER_NAME)]
    name: String,
}

fn load_config(cli: &Cli) -> Result<Config> {
    match &cli.config {
        Some(path) => Ok(Config::from_file(path)?),
        None => {
            let cwd = std::env::current_dir().context("cannot resolve working directory")?;
            let (cfg, _) = Config::discover(cwd)?;
            Ok(cfg)
        }
    }
}

fn connection(cli: &Cli) -> Result<ConnectionConfig> {
    match ConnectionConfig::in_cluster() {
        Ok(conn) => Ok(conn),
        Err(in_cluster) => {
            tracing::debug!(error = %in_cluster, "not in cluster, using kubeconfig");
            let path = match &cli.kubeconfig {
                Some(path) => path.clone(),
                None => std::env::var_os("HOME")
                    .map(|home| PathBuf::from(home).join(".kube").join("config"))
                    .context("no --kubeconfig given and HOME is unset")?,
            };
            Ok(ConnectionConfig::from_kubeconfig(&path)?)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = load_config(&cli)?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::default().add_directive(cfg.log_level().level_filter().into())),
        )
        .init();

    let conn = connection(&cli)?;
    let subscribers: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    let manager = Manager::builder(cfg, conn)
        .with_subscribers(subscribers)
        .build();

    let reloader = Reloader::new(&cli.name)
        .namespace(&cli.namespace)
        .label_selector(&cli.selector);
    manager
        .register(Arc::new(reloader))
        .context("cannot register the reloader")?;

    manager.run_until_signal(CancellationToken::new()).await?;
    Ok(())
}
