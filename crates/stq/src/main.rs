use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use stq_core::{
    config::Config,
    coordinator::TaskCoordinator,
    editor::DocumentEditor,
    fetcher::FileFetcher,
    ports::BinaryFetcher,
    worker::Worker,
};
use stq_graph::{
    AuthConfig, AuthSession, GraphBinaryFetcher, GraphDocumentStore, GraphListStore,
    HttpBinaryFetcher,
};

mod handler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stq_core::logging::init("stq")?;

    let cfg = Arc::new(Config::load()?);

    let auth = Arc::new(AuthSession::new(AuthConfig {
        token_url: cfg.auth_token_url.clone(),
        client_id: cfg.auth_client_id.clone(),
        client_secret: cfg.auth_client_secret.clone(),
        scope: cfg.auth_scope.clone(),
        cache_file: Some(cfg.token_cache_file.clone()),
        request_gap: cfg.request_gap,
        request_jitter: cfg.request_jitter,
        http_timeout: cfg.short_timeout,
    })?);

    let list_store = Arc::new(GraphListStore::new(
        auth.clone(),
        cfg.api_base_url.clone(),
        cfg.short_timeout,
    )?);
    let coordinator = Arc::new(TaskCoordinator::new(
        list_store,
        cfg.list_ref(),
        cfg.stale_threshold,
    ));

    let primary = Arc::new(GraphBinaryFetcher::new(
        auth.clone(),
        cfg.api_base_url.clone(),
        cfg.long_timeout,
    )?);
    let secondary: Option<Arc<dyn BinaryFetcher>> = match &cfg.secondary_file_base_url {
        Some(base) => Some(Arc::new(HttpBinaryFetcher::new(
            base.clone(),
            cfg.long_timeout,
        )?)),
        None => None,
    };
    let files = Arc::new(FileFetcher::new(
        primary,
        secondary,
        cfg.max_file_size_bytes,
        cfg.failure_threshold,
        cfg.circuit_cooldown,
    ));

    let documents = Arc::new(GraphDocumentStore::new(
        auth,
        cfg.api_base_url.clone(),
        cfg.short_timeout,
    )?);
    let editor = Arc::new(DocumentEditor::new(documents));

    let handler = Arc::new(handler::QueueTaskHandler::new(files, editor));
    let worker = Worker::new(coordinator, handler, cfg.poll_interval);

    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("[WORKER] shutdown requested");
            cancel_on_signal.cancel();
        }
    });

    worker.run(cancel).await;
    Ok(())
}
