use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chat_query_engine::config::EngineConfig;
use chat_query_engine::database::PgChatHistory;
use chat_query_engine::history::{ChatHistoryStore, InMemoryChatHistory};
use chat_query_engine::llm_client::{ChatCompletionsClient, LanguageModel};
use chat_query_engine::{ChatEngine, GrpcServer};

/// Hides the credentials part of a connection URL for logging.
fn redact_database_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end + 3 => {
            format!("{}***{}", &url[..scheme_end + 3], &url[at..])
        }
        _ => url.to_string(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chat_query_engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Chat Query Engine v{}", env!("CARGO_PKG_VERSION"));

    let config = EngineConfig::from_env().context("failed to load configuration")?;

    info!("Configuration loaded:");
    info!("  gRPC Port: {}", config.grpc_port);
    info!("  LLM endpoint: {}", config.llm.base_url);
    info!("  LLM model: {}", config.llm.model);
    match &config.database_url {
        Some(url) => info!("  Database URL: {}", redact_database_url(url)),
        None => info!("  Database URL: not set, chat history kept in memory"),
    }

    let model: Arc<dyn LanguageModel> = Arc::new(
        ChatCompletionsClient::new(config.llm.clone())
            .context("failed to build language model client")?,
    );

    let history: Arc<dyn ChatHistoryStore> = match &config.database_url {
        Some(url) => Arc::new(
            PgChatHistory::new(url)
                .await
                .context("failed to open chat history database")?,
        ),
        None => Arc::new(InMemoryChatHistory::new()),
    };

    let engine = Arc::new(ChatEngine::new(&config, model, history));
    info!("Chat engine initialized successfully");

    let grpc_server = GrpcServer::new(engine.clone());
    let grpc_addr: SocketAddr = ([0, 0, 0, 0], config.grpc_port).into();
    let grpc_handle = tokio::spawn(async move {
        if let Err(e) = grpc_server.start(grpc_addr).await {
            error!("gRPC server error: {}", e);
        }
    });

    info!("gRPC server listening on {}", grpc_addr);

    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received shutdown signal, gracefully shutting down...");
        }
        Err(err) => {
            error!("Unable to listen for shutdown signal: {}", err);
        }
    }

    grpc_handle.abort();

    info!("Chat Query Engine shutdown complete");
    Ok(())
}
