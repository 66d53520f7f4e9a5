use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use axum::Router;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use reviewdigest::app::service::{ReviewService, TriggerOutcome, normalize_subject};
use reviewdigest::config::{AppConfig, Secrets};
use reviewdigest::formats::{AnalysisResult, ScrapeStatus, StoredReview};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct AppArgs {
    /// YAML config file (falls back to `REVIEWDIGEST_CONFIG`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides `server.addr`.
    #[arg(long)]
    addr: Option<SocketAddr>,

    /// Overrides `server.max_concurrency`.
    #[arg(long)]
    max_concurrency: Option<usize>,
}

#[derive(Clone)]
struct AppState {
    service: Arc<ReviewService>,
}

type ApiError = (StatusCode, Json<ErrorBody>);

#[derive(Debug, Serialize, Deserialize)]
struct ErrorBody {
    error: String,
}

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    reviewdigest::logging::init()?;

    let args = AppArgs::parse();
    tracing::info!(?args, "starting reviewdigest-app");

    let mut config = AppConfig::load(args.config.as_deref()).context("load config")?;
    if let Some(addr) = args.addr {
        config.server.addr = addr;
    }
    if let Some(max_concurrency) = args.max_concurrency {
        config.server.max_concurrency = max_concurrency;
    }
    let secrets = Secrets::from_env();
    tracing::info!(
        backend = ?config.store.backend,
        llm_engine = ?config.distill.llm_engine,
        max_concurrency = config.server.max_concurrency,
        ?secrets,
        "configuration loaded"
    );

    let service = ReviewService::from_config(&config, &secrets)?;
    let app = router(AppState {
        service: Arc::new(service),
    });

    let addr = config.server.addr;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|err| anyhow::anyhow!("bind {addr}: {err}"))?;
    tracing::info!(addr = %addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok\n" }))
        .route("/api/scrape-reviews", post(start_scrape))
        .route("/api/reviews/:subject", get(get_reviews))
        .route("/api/reviews/:subject/analysis", get(get_analysis))
        .route("/api/scrape-status/:subject", get(get_status))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(?err, "listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

#[derive(Debug, Deserialize)]
struct ScrapeRequest {
    #[serde(default)]
    keyword: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ScrapeAccepted {
    status: String,
    message: String,
}

async fn start_scrape(
    State(state): State<AppState>,
    payload: Result<Json<ScrapeRequest>, JsonRejection>,
) -> Result<Json<ScrapeAccepted>, ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        tracing::warn!(%rejection, "invalid scrape request body");
        api_error(
            StatusCode::BAD_REQUEST,
            format!("invalid request body: {}", rejection.body_text()),
        )
    })?;
    let Some(subject) = request.keyword.as_deref().and_then(normalize_subject) else {
        tracing::warn!("scrape request without keyword");
        return Err(api_error(StatusCode::BAD_REQUEST, "no keyword provided"));
    };

    let outcome = state.service.trigger(subject, false).await.map_err(|err| {
        tracing::error!(subject, ?err, "start scrape");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"))
    })?;

    match outcome {
        TriggerOutcome::Started(status) => Ok(Json(ScrapeAccepted {
            status: "processing".to_owned(),
            message: format!("scraping started (run {})", status.run_id),
        })),
        TriggerOutcome::NotDue => Ok(Json(ScrapeAccepted {
            status: "not_required".to_owned(),
            message: "scraping not needed at this time".to_owned(),
        })),
        TriggerOutcome::AlreadyRunning(status) => Err(api_error(
            StatusCode::CONFLICT,
            format!(
                "a run for {subject} is already in progress ({})",
                status.message
            ),
        )),
    }
}

async fn get_reviews(
    State(state): State<AppState>,
    Path(subject): Path<String>,
) -> Result<Json<Vec<StoredReview>>, ApiError> {
    let Some(subject) = normalize_subject(&subject) else {
        return Err(api_error(StatusCode::BAD_REQUEST, "subject is required"));
    };
    let reviews = state.service.reviews(subject).await.map_err(|err| {
        tracing::error!(subject, ?err, "list reviews");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"))
    })?;
    Ok(Json(reviews))
}

async fn get_analysis(
    State(state): State<AppState>,
    Path(subject): Path<String>,
) -> Result<Json<AnalysisResult>, ApiError> {
    let Some(subject) = normalize_subject(&subject) else {
        return Err(api_error(StatusCode::BAD_REQUEST, "subject is required"));
    };
    let analysis = state.service.analysis(subject).await.map_err(|err| {
        tracing::error!(subject, ?err, "read analysis");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"))
    })?;
    analysis
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "analysis not found"))
}

async fn get_status(
    State(state): State<AppState>,
    Path(subject): Path<String>,
) -> Result<Json<ScrapeStatus>, ApiError> {
    state
        .service
        .status(&subject)
        .await
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "no scrape status for subject"))
}
