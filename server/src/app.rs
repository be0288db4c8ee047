use std::{sync::Arc, time::Instant};

use axum::{
    extract::{Request, State},
    http::{HeaderValue, Method},
    middleware::Next,
    response::Response,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use llm_core::{CompletionConfig, CompletionSource, OpenAiClient};
use stt_core::{DeepgramClient, Transcriber, TranscriptionConfig};
use tower::ServiceBuilder;
use tower_governor::{governor::GovernorConfigBuilder, key_extractor::GlobalKeyExtractor, GovernorLayer};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};
use tts_core::{ElevenLabsClient, SpeechConfig, SymphoniaTranscoder, Synthesizer, Transcoder, VoiceMap};

use crate::{
    config::ServerConfig,
    metrics::{MetricsResponse, PipelineMetrics, SystemMetrics},
    ws::ws_handler,
};

/// External collaborators, shared by every session.
#[derive(Clone)]
pub struct Services {
    pub transcriber: Arc<dyn Transcriber>,
    pub completion: Arc<dyn CompletionSource>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub transcoder: Arc<dyn Transcoder>,
}

impl Services {
    /// Real HTTP clients configured from the environment. Missing API keys
    /// are not fatal here; the affected calls fail when made.
    pub fn from_env() -> anyhow::Result<Self> {
        let voices = VoiceMap::from_env()?;
        if voices.is_empty() {
            warn!("No TTS voices configured, every sentence will fail synthesis");
        } else {
            info!("TTS voices configured for: {}", voices.languages().join(", "));
        }

        Ok(Self {
            transcriber: Arc::new(DeepgramClient::new(TranscriptionConfig::from_env())),
            completion: Arc::new(OpenAiClient::new(CompletionConfig::from_env())),
            synthesizer: Arc::new(ElevenLabsClient::new(SpeechConfig::from_env(), voices)),
            transcoder: Arc::new(SymphoniaTranscoder),
        })
    }
}

#[derive(Clone)]
pub struct AppState {
    pub services: Services,
    pub metrics: Arc<PipelineMetrics>,
    pub config: ServerConfig,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(services: Services, config: ServerConfig) -> Self {
        Self {
            services,
            metrics: Arc::new(PipelineMetrics::new()),
            config,
            started_at: Instant::now(),
        }
    }
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any)
        .allow_credentials(false);

    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .flatten()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();

    if origins.is_empty() {
        warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (development mode)");
        base.allow_origin(Any)
    } else {
        info!("CORS configured for {} origin(s)", origins.len());
        base.allow_origin(AllowOrigin::list(origins))
    }
}

async fn add_request_id(mut request: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let Ok(value) = HeaderValue::from_str(&request_id) else {
        return next.run(request).await;
    };
    request.headers_mut().insert("x-request-id", value.clone());
    let mut response = next.run(request).await;
    response.headers_mut().insert("x-request-id", value);
    response
}

pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let config = state.config.clone();

    // One shared bucket; per-IP keys are unreliable behind proxies.
    let per_minute = config.rate_limit_per_minute.max(1);
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(u64::from(per_minute / 60).max(1))
            .burst_size(per_minute)
            .key_extractor(GlobalKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("invalid rate limit: {} per minute", per_minute))?,
    );
    info!("Rate limiting: {} requests per minute", per_minute);

    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(GovernorLayer::new(governor_conf))
        .layer(TimeoutLayer::new(config.request_timeout()))
        .layer(cors_layer(&config))
        .into_inner();

    let api = Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/voices", get(list_voices))
        .route("/metrics", get(metrics_endpoint))
        .route("/ws", get(ws_handler));

    Ok(Router::new()
        .merge(api.clone())
        .nest("/api", api)
        .layer(axum::middleware::from_fn(add_request_id))
        .layer(middleware_stack)
        .with_state(state))
}

pub async fn index() -> &'static str {
    "Voice relay server is running. Connect a WebSocket client to /ws."
}

pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn list_voices(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.services.synthesizer.languages())
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> Json<MetricsResponse> {
    let mut system = sysinfo::System::new();
    system.refresh_cpu();
    system.refresh_memory();

    let memory_used = system.used_memory();
    let memory_total = system.total_memory();
    let memory_usage_percent = if memory_total > 0 {
        (memory_used as f64 / memory_total as f64 * 100.0) as f32
    } else {
        0.0
    };

    // Unix-like systems only
    let system_load = {
        #[cfg(unix)]
        {
            std::fs::read_to_string("/proc/loadavg")
                .ok()
                .and_then(|l| l.split_whitespace().next().and_then(|s| s.parse::<f64>().ok()))
        }
        #[cfg(not(unix))]
        None
    };

    Json(MetricsResponse {
        timestamp: Utc::now(),
        system: SystemMetrics {
            cpu_usage_percent: system.global_cpu_info().cpu_usage(),
            memory_used_mb: memory_used / 1024 / 1024,
            memory_total_mb: memory_total / 1024 / 1024,
            memory_usage_percent,
            uptime_seconds: state.started_at.elapsed().as_secs(),
            system_load,
        },
        pipeline: state.metrics.snapshot(),
    })
}
