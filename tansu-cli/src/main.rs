//! # TansuDB CLI
//!
//! Operational commands against a local database directory, plus `serve` to
//! boot the HTTP server.

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use tansu_core::{DatabaseConfig, IndexAlgorithm, Vector};
use tansu_storage::Database;

#[derive(Parser)]
#[command(name = "tansu")]
#[command(about = "TansuDB - durable embeddable vector database")]
struct Cli {
    /// Database root; snapshots live in <dir>/data, WAL segments in <dir>/logs
    #[arg(long, default_value = "./tansu", global = true)]
    dir: PathBuf,

    /// Vector dimension of the database
    #[arg(long, default_value_t = 128, global = true)]
    dimensions: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        #[arg(long, default_value_t = 3000)]
        port: u16,
        /// Index algorithm: exact, lsh, or hnsw
        #[arg(long, default_value = "exact")]
        algorithm: String,
    },
    /// Print database statistics as JSON
    Stats,
    /// Insert one record (vector as comma-separated floats)
    Insert {
        key: String,
        vector: String,
        #[arg(long, default_value = "")]
        metadata: String,
    },
    /// k-nearest-neighbor search (vector as comma-separated floats)
    Search {
        vector: String,
        #[arg(long, default_value_t = 10)]
        k: usize,
    },
    /// Force a checkpoint
    Checkpoint,
}

fn open_config(dir: &PathBuf, dimensions: usize) -> DatabaseConfig {
    let mut config = DatabaseConfig::new(dimensions);
    config.persistence.data_directory = dir.join("data");
    config.persistence.log_directory = dir.join("logs");
    config
}

fn parse_components(raw: &str) -> Result<Vector> {
    let values = raw
        .split(',')
        .map(|c| c.trim().parse::<f32>())
        .collect::<std::result::Result<Vec<f32>, _>>()?;
    Ok(Vector::new(values)?)
}

fn open_database(dir: &PathBuf, dimensions: usize) -> Result<Database> {
    let db = Database::new(open_config(dir, dimensions))?;
    db.initialize()?;
    Ok(db)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, algorithm } => {
            let mut config = open_config(&cli.dir, cli.dimensions);
            config.algorithm = IndexAlgorithm::parse(&algorithm)?;
            let addr = format!("0.0.0.0:{}", port);
            tansu_api::serve(&addr, config).await?;
        }
        Commands::Stats => {
            let db = open_database(&cli.dir, cli.dimensions)?;
            let stats = db.statistics();
            let json = serde_json::json!({
                "vector_count": stats.vector_count,
                "dimensions": stats.dimensions,
                "algorithm": stats.algorithm.name(),
                "metric": stats.metric.name(),
                "recovery_state": stats.recovery_state,
                "metrics": stats.metrics,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        Commands::Insert {
            key,
            vector,
            metadata,
        } => {
            let db = open_database(&cli.dir, cli.dimensions)?;
            let vector = parse_components(&vector)?;
            if db.insert(&key, vector, &metadata)? {
                println!("inserted {}", key);
            } else {
                bail!("insert rejected (duplicate key or NaN component)");
            }
            db.shutdown()?;
        }
        Commands::Search { vector, k } => {
            let db = open_database(&cli.dir, cli.dimensions)?;
            let query = parse_components(&vector)?;
            for (key, distance) in db.similarity_search(&query, k)? {
                println!("{}\t{}", key, distance);
            }
        }
        Commands::Checkpoint => {
            let db = open_database(&cli.dir, cli.dimensions)?;
            let sequence = db.checkpoint()?;
            println!("checkpoint written at sequence {}", sequence);
        }
    }

    Ok(())
}
