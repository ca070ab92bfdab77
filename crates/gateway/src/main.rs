//! LexForge API Gateway
//!
//! HTTP entry point for the answer pipeline.
//! Handles:
//! - Caller identity and group claims asserted upstream
//! - Request validation and the whole-request timeout
//! - JSON and NDJSON answer endpoints
//! - Observability (logging, metrics, request IDs)

mod handlers;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use lexforge_common::{
    config::{AppConfig, ObservabilityConfig},
    embeddings::create_embedder,
    llm::create_chat_models,
    metrics, ChatModel,
};
use lexforge_context::{AnswerPipeline, PipelineConfig};
use lexforge_search::{create_store, FragmentStore};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::{signal, sync::watch};
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Names of the wired components, reported by `/ready`
#[derive(Debug, Clone)]
pub struct Components {
    pub store: String,
    pub generator: String,
    pub reasoner: String,
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pipeline: Arc<AnswerPipeline>,
    pub components: Arc<Components>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn FragmentStore>,
        reasoner: Arc<dyn ChatModel>,
        generator: Arc<dyn ChatModel>,
    ) -> Self {
        let components = Components {
            store: store.name().to_string(),
            generator: generator.model_name().to_string(),
            reasoner: reasoner.model_name().to_string(),
        };
        let pipeline = AnswerPipeline::new(store, reasoner, generator, PipelineConfig::from(&config));

        Self {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
            components: Arc::new(components),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load().context("failed to load configuration")?;

    init_tracing(&config.observability);
    info!("Starting LexForge API Gateway v{}", lexforge_common::VERSION);

    // Initialize metrics
    if config.observability.metrics_port != 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install Prometheus exporter")?;
        info!("Metrics exporter listening on {}", addr);
    }
    metrics::register_metrics();

    // Wire the pipeline
    let embedder = create_embedder(&config.embedding)?;
    let store = create_store(&config, embedder).await?;
    let (generator, reasoner) = create_chat_models(&config.llm)?;
    info!(
        store = store.name(),
        generator = generator.model_name(),
        reasoner = reasoner.model_name(),
        agentic = config.retrieval.agentic,
        "Answer pipeline ready"
    );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid server.host or server.port")?;
    let shutdown_timeout = config.shutdown_timeout();
    let state = AppState::new(config, store, reasoner, generator);

    // Build the router
    let app = create_router(state);

    // Start the server
    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let (stop_tx, mut stop_rx) = watch::channel(false);
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stop_rx.changed().await;
            })
            .await
    });

    tokio::select! {
        result = &mut server => {
            result??;
            return Ok(());
        }
        _ = shutdown_signal() => {}
    }

    let _ = stop_tx.send(true);
    match tokio::time::timeout(shutdown_timeout, server).await {
        Ok(result) => result??,
        Err(_) => warn!(?shutdown_timeout, "In-flight requests did not finish before the shutdown timeout"),
    }

    info!("Server shutdown complete");
    Ok(())
}

/// JSON or plain logs; `RUST_LOG` wins over the configured level
fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if config.json_logging {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let api_routes = Router::new()
        .route("/chat", post(handlers::chat::chat))
        .route("/chat/stream", post(handlers::chat::chat_stream));

    Router::new()
        // Health endpoints (no identity needed)
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .nest("/v2", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(propagate_id)
        .layer(request_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use lexforge_common::auth::{CALLER_GROUPS_HEADER, CALLER_ROLES_HEADER};
    use lexforge_common::embeddings::MockEmbedder;
    use lexforge_common::llm::{ScriptedChatModel, ScriptedReply};
    use lexforge_common::Fragment;
    use lexforge_search::MemoryFragmentStore;
    use tower::ServiceExt;

    async fn app(generator: ScriptedChatModel) -> Router {
        let store = MemoryFragmentStore::new(Arc::new(MockEmbedder::new(64)));
        store
            .insert_many(vec![
                Fragment::new(
                    "cpr-15-4",
                    "CPR Part 15",
                    "15.4",
                    "The period for filing a defence is 14 days after service of the particulars of claim.",
                )
                .with_subsection("15.4"),
                Fragment::new("memo", "Firm memo", "2", "Defence filing checklist for the litigation team.")
                    .with_subsection("Checklist")
                    .with_groups(["litigation"]),
            ])
            .await
            .unwrap();

        let state = AppState::new(
            AppConfig::default(),
            Arc::new(store),
            Arc::new(ScriptedChatModel::offline()),
            Arc::new(generator),
        );
        create_router(state)
    }

    fn chat_request(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .header(CALLER_GROUPS_HEADER, "clients")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app(ScriptedChatModel::offline())
            .await
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_chat_json() {
        let body = serde_json::json!({
            "messages": [{"role": "user", "content": "When must a defence be filed?"}],
        });
        let response = app(ScriptedChatModel::offline())
            .await
            .oneshot(chat_request("/v2/chat", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["citations"][0]["sourceFile"], "CPR Part 15");
        assert!(value.get("trace").is_none());
    }

    #[tokio::test]
    async fn test_chat_stream_ndjson() {
        let generator = ScriptedChatModel::new();
        generator.push_stream(ScriptedReply::Chunks(vec![
            "Fourteen days ".into(),
            "[15.4, 15.4, CPR Part 15].".into(),
        ]));
        let body = serde_json::json!({
            "messages": [{"role": "user", "content": "defence filing period"}],
            "overrides": {"include_trace": true},
        });
        let mut request = chat_request("/v2/chat/stream", body);
        request
            .headers_mut()
            .insert(CALLER_ROLES_HEADER, "thought-process".parse().unwrap());

        let response = app(generator).await.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/x-ndjson");

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let lines: Vec<serde_json::Value> = String::from_utf8(bytes.to_vec())
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["type"], "delta");
        assert_eq!(lines[2]["type"], "completed");
        assert_eq!(lines[2]["citations"].as_array().unwrap().len(), 1);
        let considered = lines[2]["trace"]["fragments_considered"].as_array().unwrap();
        assert!(considered.iter().all(|f| f["id"] != "memo"));
    }

    #[tokio::test]
    async fn test_chat_rejects_invalid_request() {
        let body = serde_json::json!({"messages": []});
        let response = app(ScriptedChatModel::offline())
            .await
            .oneshot(chat_request("/v2/chat", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["error"]["code"], "VALIDATION_ERROR");
    }
}
