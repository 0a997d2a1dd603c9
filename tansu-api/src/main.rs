//! # TansuDB Server
//!
//! Run with: `cargo run --bin tansu-server -- --data-dir ./data --port 3000`

use std::path::PathBuf;

use anyhow::Result;
use tracing::{info, Level};

use tansu_api::serve;
use tansu_core::{DatabaseConfig, IndexAlgorithm};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    let arg_value = |name: &str| {
        args.iter()
            .position(|a| a == name)
            .and_then(|i| args.get(i + 1))
            .cloned()
    };

    let data_dir = arg_value("--data-dir")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("./data"));
    let port: u16 = arg_value("--port")
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);
    let dimensions: usize = arg_value("--dimensions")
        .and_then(|d| d.parse().ok())
        .unwrap_or(128);
    let algorithm = arg_value("--algorithm")
        .map(|a| IndexAlgorithm::parse(&a))
        .transpose()?
        .unwrap_or_default();

    let mut config = DatabaseConfig::new(dimensions);
    config.algorithm = algorithm;
    config.persistence.data_directory = data_dir.join("data");
    config.persistence.log_directory = data_dir.join("logs");

    let addr = format!("0.0.0.0:{}", port);
    info!("starting TansuDB server on {}", addr);
    info!("data directory: {:?}, dimensions: {}", data_dir, dimensions);

    serve(&addr, config).await
}
