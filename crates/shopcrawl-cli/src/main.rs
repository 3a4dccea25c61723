use std::io::Write;

use shopcrawl_crawler::{BrandResult, BrandState, CrawlOrchestrator, ShutdownHandle};
use tracing_subscriber::EnvFilter;

/// Whole-run counts logged once the crawl returns.
#[derive(Debug, Default, PartialEq, Eq)]
struct RunTotals {
    brands: usize,
    done: usize,
    failed_partial: usize,
    unfinished: usize,
    product_urls: usize,
    products: usize,
    errors: usize,
}

impl RunTotals {
    fn from_results(results: &[BrandResult]) -> Self {
        let mut totals = Self {
            brands: results.len(),
            ..Self::default()
        };
        for result in results {
            match result.state {
                BrandState::Done => totals.done += 1,
                BrandState::FailedPartial => totals.failed_partial += 1,
                _ => totals.unfinished += 1,
            }
            totals.product_urls += result.product_urls.len();
            totals.products += result.products.len();
            totals.errors += result.errors.len();
        }
        totals
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = shopcrawl_core::load_crawl_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let jobs = shopcrawl_core::load_brand_jobs(&config.jobs_path)?;
    tracing::info!(
        jobs_path = %config.jobs_path.display(),
        brands = jobs.len(),
        checkpoint = config.checkpoint_path.as_ref().map(|p| p.display().to_string()),
        "loaded brand jobs"
    );

    let orchestrator = CrawlOrchestrator::from_config(config).await?;
    let _signal_task = tokio::spawn(cancel_on_signal(orchestrator.shutdown_handle()));

    let results = orchestrator.run(&jobs).await?;
    let totals = RunTotals::from_results(&results);

    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &results)?;
    writeln!(stdout)?;

    tracing::info!(
        brands = totals.brands,
        done = totals.done,
        failed_partial = totals.failed_partial,
        unfinished = totals.unfinished,
        product_urls = totals.product_urls,
        products = totals.products,
        errors = totals.errors,
        "crawl complete"
    );
    Ok(())
}

/// Requests a cooperative stop on Ctrl-C (or SIGTERM on Unix). Work already
/// checkpointed is kept; the next run resumes from there.
async fn cancel_on_signal(shutdown: ShutdownHandle) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, finishing current product and stopping");
    shutdown.request();
}
