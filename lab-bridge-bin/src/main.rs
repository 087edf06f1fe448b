use clap::Parser;
use config::{Config, Environment, File};
use lab_bridge_sysmex::{
    AnalyzerConfig, BridgeError, BridgeResult, FileArchiver, HttpUpstream, MappingTable,
    MessageArchiver, NullArchiver, SysmexDriver,
};
use std::{path::PathBuf, sync::Arc};
use tracing::info;

/// lab-bridge - ASTM E1381 analyzer to HL7 v2.5.1 LIS bridge
///
/// Drives a single Sysmex XP-family analyzer: receives ASTM result and
/// query messages over TCP, translates them into IHE LAB-27/LAB-29 HL7
/// exchanges with the LIS, and downloads LAB-28 orders back to the
/// instrument.
#[derive(Parser)]
#[command(name = "lab-bridge")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "ASTM E1381 ↔ HL7 v2.5.1 analyzer bridge", long_about = None)]
struct Cli {
    /// Analyzer configuration file (flat key-value TOML)
    #[arg(short, long, env = "LAB_BRIDGE_CONFIG", default_value = "analyzer.toml")]
    config: PathBuf,

    /// Directory for archived messages (used when archive_msg is enabled)
    #[arg(long, env = "LAB_BRIDGE_ARCHIVE_DIR", default_value = "archive")]
    archive_dir: PathBuf,
}

fn load_config(path: &PathBuf) -> BridgeResult<AnalyzerConfig> {
    Config::builder()
        .add_source(File::from(path.clone()))
        .add_source(
            Environment::with_prefix("LAB_BRIDGE")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .and_then(Config::try_deserialize)
        .map_err(|e| BridgeError::Configuration(format!("loading {}: {e}", path.display())))
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> BridgeResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;
    let mapping = MappingTable::load(&cfg.mapping_path)?;

    let archiver: Arc<dyn MessageArchiver> = if cfg.archiving_enabled() {
        Arc::new(FileArchiver::new(cli.archive_dir))
    } else {
        Arc::new(NullArchiver)
    };

    let driver = SysmexDriver::new(cfg, mapping, Arc::new(HttpUpstream::new()), archiver)?;
    info!("{}", driver.info());

    driver.listen().await?;

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| BridgeError::Configuration(format!("waiting for ctrl-c: {e}")))?;
    info!("shutdown requested");
    driver.stop_listening();

    Ok(())
}
