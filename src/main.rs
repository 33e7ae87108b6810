use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use graph_classifier::api::api_routes;
use graph_classifier::config::{EngineConfig, ServerConfig};
use graph_classifier::mail::EmailThread;
use graph_classifier::pipeline::{BulkOptions, Classifier};
use graph_classifier::rules::RuleStore;
use graph_classifier::semantic::LexicalMatcher;
use graph_classifier::store::{LibSqlBackend, RuleRepository};

const USAGE: &str = "usage: graph-classifier [classify <threads.json>]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let engine_config = EngineConfig::from_env()?;
    let server_config = ServerConfig::from_env()?;

    // ── Rule store ───────────────────────────────────────────────────────
    let backend = LibSqlBackend::new_local(&server_config.db_path)
        .await
        .with_context(|| format!("opening database at {}", server_config.db_path.display()))?;
    let repository: Arc<dyn RuleRepository> = Arc::new(backend);
    let store = Arc::new(RuleStore::open(repository).await.context("loading rules")?);

    let classifier = Arc::new(Classifier::new(
        store.clone(),
        Arc::new(LexicalMatcher::new()),
        engine_config.clone(),
    ));

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.as_slice() {
        [] => serve(classifier, store, &server_config, &engine_config).await,
        [command, path] if command == "classify" => classify_file(&classifier, Path::new(path)).await,
        _ => anyhow::bail!(USAGE),
    }
}

async fn serve(
    classifier: Arc<Classifier>,
    store: Arc<RuleStore>,
    server: &ServerConfig,
    engine: &EngineConfig,
) -> anyhow::Result<()> {
    eprintln!("📬 Graph Classifier v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", server.db_path.display());
    eprintln!("   Rules: {} loaded", store.list(false).await.len());
    eprintln!(
        "   Workers: {} (thread timeout {:?}, bulk timeout {:?})",
        engine.concurrency, engine.thread_timeout, engine.bulk_timeout
    );
    eprintln!("   API: http://0.0.0.0:{}/api\n", server.port);

    let app = api_routes(classifier, store);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", server.port))
        .await
        .with_context(|| format!("binding port {}", server.port))?;
    tracing::info!(port = server.port, "Classifier API started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutting down");
        })
        .await?;
    Ok(())
}

/// Classify a JSON array of threads and print the outcome. Ctrl-C stops
/// dispatching new threads; finished ones are still printed.
async fn classify_file(classifier: &Classifier, path: &Path) -> anyhow::Result<()> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let threads: Vec<EmailThread> =
        serde_json::from_str(&raw).with_context(|| format!("parsing threads from {}", path.display()))?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; finishing in-flight threads");
            on_interrupt.cancel();
        }
    });

    let outcome = classifier
        .classify_bulk(threads, BulkOptions::default(), cancel)
        .await?;

    let items: Vec<serde_json::Value> = outcome
        .items
        .iter()
        .map(|item| match item {
            Ok(result) => serde_json::json!({ "success": true, "result": result }),
            Err(error) => serde_json::json!({ "success": false, "error": error }),
        })
        .collect();
    let report = serde_json::json!({
        "items": items,
        "cancelled": outcome.cancelled,
        "timedOut": outcome.timed_out,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    eprintln!(
        "   Classified {} of {} threads",
        outcome.succeeded(),
        outcome.items.len()
    );
    Ok(())
}
