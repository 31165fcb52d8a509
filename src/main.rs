use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use listing_harvester::crawling::{CrawlContext, CrawlScheduler, preview, survey_category};
use listing_harvester::domain::Category;
use listing_harvester::infrastructure::{
    CategorySource, CrawlerConfig, DatabaseConnection, ProgressCheckpoint, ProxyPool, ProxySource,
    SqliteProductSink, SqliteRegistry, init_logging_with_config,
};

#[derive(Parser, Debug)]
#[command(name = "listing-harvester")]
#[command(about = "Harvests product records from paginated catalog listings")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to config/harvester.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Fetch without proxies
    #[arg(long, global = true)]
    direct: bool,

    /// Only these category ids (repeatable)
    #[arg(long = "category", global = true)]
    categories: Vec<i64>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Crawl every pending leaf category (default)
    Crawl,
    /// Print the first records a crawl would store, as JSON lines
    Preview {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Print page count and last-page size per category, as JSON lines
    Survey,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = CrawlerConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    init_logging_with_config(&config.logging)?;

    let db = DatabaseConnection::with_max_connections(
        &config.storage.database_url,
        config.storage.db_max_connections,
    )
    .await
    .with_context(|| format!("Failed to open database {}", config.storage.database_url))?;
    db.migrate().await?;
    db.ping().await?;

    let checkpoint = ProgressCheckpoint::load(&config.storage.checkpoint_path)
        .await
        .context("Failed to read crawl checkpoint")?;

    let registry = Arc::new(SqliteRegistry::new(db.pool().clone()));
    let proxies = proxy_pool(registry.as_ref(), cli.direct).await;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing pages in flight");
            interrupt.cancel();
        }
    });

    let sink = Arc::new(SqliteProductSink::new(db.pool().clone()));
    let ctx = Arc::new(CrawlContext::over_http(
        config,
        proxies,
        Arc::new(checkpoint),
        sink,
        cancel,
    )?);

    let result = match cli.command.unwrap_or(Command::Crawl) {
        Command::Crawl => {
            let scheduler = CrawlScheduler::new(Arc::clone(&ctx), registry)
                .with_selection(cli.categories);
            let summary = scheduler.run().await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Command::Preview { limit } => {
            let categories = scheduler_categories(&ctx, registry, cli.categories).await?;
            let records = preview(ctx.source.as_ref(), &ctx.parser, &categories, limit).await;
            ctx.shutdown().await;
            records
                .iter()
                .try_for_each(|record| serde_json::to_string(record).map(|line| println!("{line}")))
                .map_err(Into::into)
        }
        Command::Survey => survey(&ctx, registry.as_ref(), &cli.categories).await,
    };

    db.close().await;
    if let Err(err) = &result {
        error!("Run failed: {:#}", err);
    }
    result
}

/// Live proxies from the registry, or direct egress when disabled or unavailable.
async fn proxy_pool(registry: &SqliteRegistry, direct: bool) -> ProxyPool {
    if direct {
        info!("Proxies disabled, fetching directly");
        return ProxyPool::direct();
    }
    match registry.live_proxies().await {
        Ok(proxies) if proxies.is_empty() => {
            warn!("No live proxies registered, fetching directly");
            ProxyPool::direct()
        }
        Ok(proxies) => {
            info!("Rotating through {} proxies", proxies.len());
            ProxyPool::new(proxies)
        }
        Err(err) => {
            warn!("Failed to load proxies ({}), fetching directly", err);
            ProxyPool::direct()
        }
    }
}

async fn scheduler_categories(
    ctx: &Arc<CrawlContext>,
    registry: Arc<SqliteRegistry>,
    selection: Vec<i64>,
) -> Result<Vec<Category>> {
    let categories = CrawlScheduler::new(Arc::clone(ctx), registry)
        .with_selection(selection)
        .eligible_categories()
        .await?;
    Ok(categories)
}

async fn survey(ctx: &CrawlContext, registry: &SqliteRegistry, selection: &[i64]) -> Result<()> {
    let categories: Vec<Category> = registry
        .categories()
        .await?
        .into_iter()
        .filter(|c| c.is_leaf)
        .filter(|c| selection.is_empty() || selection.contains(&c.id))
        .collect();

    let mut surveys = stream::iter(categories.iter())
        .map(|category| survey_category(ctx.source.as_ref(), &ctx.parser, category))
        .buffer_unordered(ctx.config.max_category_concurrency);

    while let Some(survey) = surveys.next().await {
        println!("{}", serde_json::to_string(&survey)?);
        if ctx.cancel.is_cancelled() {
            break;
        }
    }
    drop(surveys);
    ctx.shutdown().await;
    Ok(())
}
