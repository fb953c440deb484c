use tracing::info;

use crate::config::Config;
use crate::crawler::CatalogCrawler;
use crate::database::lancedb::{IndexManifest, VectorStore};
use crate::indexer::IndexBuilder;
use crate::{Result, catalog, server};

/// Scrape the storefront and write the catalog snapshot.
#[inline]
pub async fn crawl_catalog(config: &Config) -> Result<()> {
    info!("Crawling catalog from {}", config.catalog.base_url);

    let crawler = CatalogCrawler::new(config)?.with_progress();
    let (records, report) = crawler.crawl()?;
    catalog::write_snapshot(&config.snapshot_path(), &records)?;

    println!("Crawl finished:");
    println!("  Product URLs discovered: {}", report.discovered);
    println!("  Pages scraped: {}", report.scraped);
    println!("  Pages failed: {}", report.failed.len());
    for (url, reason) in &report.failed {
        println!("    {} — {}", url, reason);
    }
    println!("Snapshot: {}", config.snapshot_path().display());

    Ok(())
}

/// Embed the snapshot and upsert it into the vector index.
#[inline]
pub async fn build_index(config: &Config) -> Result<()> {
    let records = catalog::load_snapshot(&config.snapshot_path())?;
    println!(
        "Indexing {} products into namespace '{}'",
        records.len(),
        config.index.namespace
    );

    let builder = IndexBuilder::new(config).await?.with_progress();
    let report = builder.build(records).await?;

    println!("Index build finished:");
    println!("  Succeeded: {}", report.succeeded);
    println!("  Skipped: {}", report.failed());
    for (id, reason) in &report.skipped {
        println!("    {} — {}", id, reason);
    }

    Ok(())
}

/// Run the chat API.
#[inline]
pub async fn serve_api(config: &Config) -> Result<()> {
    server::serve(config).await
}

/// Operator view of the pipeline: snapshot, index manifest, stored vectors.
#[inline]
pub async fn show_status(config: &Config) -> Result<()> {
    println!("Data directory: {}", config.base_dir.display());
    println!("Namespace: {}", config.index.namespace);

    match catalog::load_snapshot(&config.snapshot_path()) {
        Ok(records) => println!("Catalog snapshot: {} products", records.len()),
        Err(_) => println!("Catalog snapshot: not found (run `product-guide crawl`)"),
    }

    match IndexManifest::load(&config.manifest_path()) {
        Ok(manifest) => {
            println!("Index built: {}", manifest.built_at.format("%Y-%m-%d %H:%M:%S UTC"));
            println!("  Embedding model: {}", manifest.embedding_model);
            println!("  Dimension: {}", manifest.dimension);
            println!("  Records: {}", manifest.record_count);
        }
        Err(_) => println!("Index: not built (run `product-guide index`)"),
    }

    match VectorStore::open(
        &config.vector_database_path(),
        &config.index.namespace,
        config.openai.embedding_dimension as usize,
    )
    .await
    {
        Ok(store) => println!("Stored vectors: {}", store.count().await?),
        Err(err) => println!("Vector store: unavailable ({err})"),
    }

    Ok(())
}

/// Print the active configuration as TOML.
#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    let rendered =
        toml::to_string_pretty(config).map_err(|e| crate::GuideError::Config(e.to_string()))?;
    println!("# {}", config.base_dir.join("config.toml").display());
    print!("{rendered}");
    Ok(())
}

/// Write the current configuration to disk so it can be edited.
#[inline]
pub fn init_config(config: &Config) -> Result<()> {
    config.save()?;
    println!("Wrote {}", config.base_dir.join("config.toml").display());
    Ok(())
}
