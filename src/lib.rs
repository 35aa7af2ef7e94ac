pub mod types;
pub mod config;
pub mod bracket;
pub mod competitors;
pub mod bracket_commands;
pub mod competitor_commands;
pub mod layout;
pub mod theme;
pub mod export;

use types::*;
use config::*;
use export::{export_file_name, ExportJob, PngRasterizer};
use theme::{Theme, THEMES};

use serde_json::json;
use std::{
    fs,
    path::PathBuf,
    sync::{Arc, Mutex},
};
use axum::{
    extract::{Path, State as AxumState},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post, put},
    Json, Router,
};
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const NO_STORE: [(&str, &str); 3] = [
    ("Cache-Control", "no-store"),
    ("Pragma", "no-cache"),
    ("Expires", "0"),
];

// ── Errors ─────────────────────────────────────────────────────────────

/// Command failure surfaced to HTTP callers as `400 {"error": ...}`.
struct ApiError(String);

impl From<String> for ApiError {
    fn from(message: String) -> Self {
        ApiError(message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!("request failed: {}", self.0);
        (StatusCode::BAD_REQUEST, Json(json!({ "error": self.0 }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn current_config(state: &HostServerState) -> Result<AppConfig, String> {
    let guard = state.config.lock().map_err(|e| e.to_string())?;
    Ok(guard.clone())
}

// ── Bracket routes ─────────────────────────────────────────────────────

async fn get_state_json(AxumState(state): AxumState<HostServerState>) -> Result<impl IntoResponse, ApiError> {
    let snapshot = bracket_commands::bracket_state(&state.session)?;
    Ok((NO_STORE, Json(snapshot)))
}

async fn get_layout_json(AxumState(state): AxumState<HostServerState>) -> Result<impl IntoResponse, ApiError> {
    let layout = bracket_commands::bracket_layout(&state.session)?;
    Ok((NO_STORE, Json(layout)))
}

async fn post_generate(
    AxumState(state): AxumState<HostServerState>,
    Json(body): Json<GenerateRequest>,
) -> ApiResult<BracketSnapshot> {
    let config = current_config(&state)?;
    let mode = body.mode.unwrap_or(config.default_mode);
    let seed = body.seed.or(config.seed);
    Ok(Json(bracket_commands::generate_bracket(&state.session, mode, seed)?))
}

async fn post_select(
    AxumState(state): AxumState<HostServerState>,
    Json(body): Json<SelectWinnerRequest>,
) -> ApiResult<BracketSnapshot> {
    Ok(Json(bracket_commands::select_bracket_winner(
        &state.session,
        body.round,
        body.match_index,
        body.competitor_id,
    )?))
}

async fn post_bracket_competitor(
    AxumState(state): AxumState<HostServerState>,
    Json(body): Json<BracketCompetitorEdit>,
) -> ApiResult<BracketSnapshot> {
    Ok(Json(bracket_commands::edit_bracket_competitor(&state.session, body)?))
}

async fn post_reset(AxumState(state): AxumState<HostServerState>) -> ApiResult<BracketSnapshot> {
    Ok(Json(bracket_commands::reset_bracket(&state.session)?))
}

// ── Competitor routes ──────────────────────────────────────────────────

async fn get_competitors(AxumState(state): AxumState<HostServerState>) -> ApiResult<Vec<bracket::Competitor>> {
    Ok(Json(competitor_commands::list_competitors(&state.session)?))
}

async fn post_competitor(
    AxumState(state): AxumState<HostServerState>,
    Json(body): Json<NewCompetitor>,
) -> ApiResult<bracket::Competitor> {
    Ok(Json(competitor_commands::add_competitor(&state.session, body)?))
}

async fn delete_competitors(AxumState(state): AxumState<HostServerState>) -> Result<StatusCode, ApiError> {
    competitor_commands::clear_competitors(&state.session)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn patch_competitor(
    AxumState(state): AxumState<HostServerState>,
    Path(id): Path<u32>,
    Json(body): Json<CompetitorEdit>,
) -> ApiResult<bracket::Competitor> {
    Ok(Json(competitor_commands::update_competitor(&state.session, id, body)?))
}

async fn delete_competitor(
    AxumState(state): AxumState<HostServerState>,
    Path(id): Path<u32>,
) -> ApiResult<bracket::Competitor> {
    Ok(Json(competitor_commands::remove_competitor(&state.session, id)?))
}

async fn put_competitor_image(
    AxumState(state): AxumState<HostServerState>,
    Path(id): Path<u32>,
    Json(body): Json<CompetitorImage>,
) -> ApiResult<bracket::Competitor> {
    Ok(Json(competitor_commands::set_competitor_image(&state.session, id, body)?))
}

// ── Export ─────────────────────────────────────────────────────────────

fn export_notice(notice: String) -> Response {
    warn!("export failed: {notice}");
    (StatusCode::UNPROCESSABLE_ENTITY, Json(ExportNotice { notice })).into_response()
}

/// Render the current bracket to PNG. If the client goes away mid-render the
/// job is dropped, which abandons the render at its next checkpoint.
async fn post_export(
    AxumState(state): AxumState<HostServerState>,
    Json(body): Json<ExportRequestBody>,
) -> Response {
    let request = match current_config(&state)
        .and_then(|config| bracket_commands::prepare_export(&state.session, &config, &body))
    {
        Ok(request) => request,
        Err(e) => return export_notice(e),
    };
    info!(theme = request.theme.name, "export started");

    let job = ExportJob::spawn(Arc::new(PngRasterizer), request);
    match job.wait().await {
        Ok(Some(bytes)) => {
            let file_name = export_file_name(chrono::Local::now());
            info!(bytes = bytes.len(), file = %file_name, "export finished");
            (
                [
                    (header::CONTENT_TYPE, "image/png".to_string()),
                    (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{file_name}\"")),
                ],
                bytes,
            )
                .into_response()
        }
        Ok(None) => export_notice("Export was cancelled.".to_string()),
        Err(e) => export_notice(e.to_string()),
    }
}

// ── Config & themes ────────────────────────────────────────────────────

async fn get_config(AxumState(state): AxumState<HostServerState>) -> ApiResult<AppConfig> {
    Ok(Json(current_config(&state)?))
}

/// Persist the config. Port and static dir changes apply on next start.
async fn put_config(
    AxumState(state): AxumState<HostServerState>,
    Json(body): Json<AppConfig>,
) -> ApiResult<AppConfig> {
    let saved = save_config_inner(body)?;
    log_env_warnings(&saved);
    let mut guard = state.config.lock().map_err(|e| e.to_string())?;
    *guard = saved.clone();
    info!("config saved");
    Ok(Json(saved))
}

async fn get_themes() -> Json<Vec<Theme>> {
    Json(THEMES.to_vec())
}

// ── Server ─────────────────────────────────────────────────────────────

pub fn host_router(state: HostServerState, static_dir: Option<PathBuf>) -> Router {
    let api = Router::new()
        .route("/state.json", get(get_state_json))
        .route("/layout.json", get(get_layout_json))
        .route(
            "/competitors",
            get(get_competitors).post(post_competitor).delete(delete_competitors),
        )
        .route("/competitors/:id", patch(patch_competitor).delete(delete_competitor))
        .route("/competitors/:id/image", put(put_competitor_image))
        .route("/bracket/generate", post(post_generate))
        .route("/bracket/select", post(post_select))
        .route("/bracket/competitor", post(post_bracket_competitor))
        .route("/bracket/reset", post(post_reset))
        .route("/export", post(post_export))
        .route("/config", get(get_config).put(put_config))
        .route("/themes", get(get_themes))
        .with_state(state);

    match static_dir.filter(|dir| dir.is_dir()) {
        Some(dir) => api.fallback_service(ServeDir::new(dir)),
        None => api,
    }
}

async fn start_host_server(state: HostServerState, static_dir: Option<PathBuf>, addr: &str) {
    let app = host_router(state, static_dir);
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("host server failed to bind {addr}: {e}");
            return;
        }
    };
    info!("host server listening at http://{addr}/");
    if let Err(e) = axum::serve(listener, app).await {
        error!("host server error: {e}");
    }
}

// ── Entry point ────────────────────────────────────────────────────────

pub fn run() {
    load_env_file();

    // Initialize tracing with a daily log file
    let logs_dir = logs_dir();
    fs::create_dir_all(&logs_dir).ok();
    let file_appender = tracing_appender::rolling::daily(&logs_dir, "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(non_blocking)
        .with_ansi(false)
        .init();
    info!("Bracket Forge starting");

    let config = load_config_inner().unwrap_or_else(|e| {
        warn!("{e}; using defaults");
        apply_env_defaults(AppConfig::default())
    });
    log_env_warnings(&config);

    let addr = format!("127.0.0.1:{}", config.port);
    let static_dir = static_dir_from_config(&config);
    let state = HostServerState {
        session: Arc::new(Mutex::new(BracketSession::new())),
        config: Arc::new(Mutex::new(config)),
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to start async runtime: {e}");
            return;
        }
    };
    runtime.block_on(start_host_server(state, static_dir, &addr));
}
