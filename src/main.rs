use clap::Parser;
use futures::TryStreamExt;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cramr::{Config, IndexedCramReader, IndexedFasta, RangeIndex, storage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let started = Instant::now();
    let config = Config::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let reference = Arc::new(IndexedFasta::from_path(config.reference.clone()).await?);
    let index = RangeIndex::read(storage::from_location(&config.effective_crai())?.as_ref()).await?;
    let reader = IndexedCramReader::open(
        storage::from_location(&config.cram)?,
        index,
        reference,
        config.reader_options(),
    )
    .await?;

    tracing::info!(
        "Querying sequence {} [{}, {}] in {}",
        config.id,
        config.start,
        config.end,
        config.cram
    );

    let query_started = Instant::now();
    let mut records = Box::pin(reader.records(config.id, config.start, config.end));
    let mut count = 0u64;
    while let Some(record) = records.try_next().await? {
        if config.json {
            println!("{}", serde_json::to_string(&record)?);
        }
        count += 1;
    }

    tracing::info!(
        records = count,
        slices_decoded = reader.cache().decode_count(),
        query_secs = query_started.elapsed().as_secs_f64(),
        "Query finished"
    );

    println!("{}", started.elapsed().as_secs_f64());

    Ok(())
}
