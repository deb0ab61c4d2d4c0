//! `kb reset` and `kb status`.

use anyhow::Result;

use crate::config::Config;
use crate::qdrant::QdrantStore;
use knowledge_rag_core::lifecycle::{reset, status, ResetOutcome};

pub async fn run_reset(config: &Config) -> Result<()> {
    let store = QdrantStore::connect(&config.store)?;
    match reset(&store, &config.store.collection).await? {
        ResetOutcome::Dropped => println!("Index reset successfully."),
        ResetOutcome::AlreadyAbsent => println!("Index already absent."),
    }
    Ok(())
}

pub async fn run_status(config: &Config) -> Result<()> {
    let store = QdrantStore::connect(&config.store)?;
    let info = status(&store, &config.store.collection).await?;

    println!("Knowledge Index");
    println!("===============");
    println!();
    println!("  Store:       {}", config.store.url);
    println!("  Collection:  {}", config.store.collection);
    println!(
        "  Provider:    {} ({})",
        config.embedding.provider,
        config.embedding.model.as_deref().unwrap_or("default model")
    );
    match info {
        Some(info) => {
            println!("  Dimensions:  {}", info.dims);
            println!("  Points:      {}", info.points);
            if let Some(dims) = config.embedding.dims {
                if dims != info.dims {
                    println!();
                    println!(
                        "  warning: configured dims {} differ from the index; run `kb reset` then `kb build`",
                        dims
                    );
                }
            }
        }
        None => println!("  Status:      not built"),
    }
    println!();
    Ok(())
}
