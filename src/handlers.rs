use crate::{
    config::{self, Config},
    error::AppError,
    library::{self, LibraryFilter},
    models::{
        AudioOnlyRequest, DownloadResponse, InfoRequest, LibraryQuery, SelectRequest,
        SessionSnapshot, ToolUpdateResponse, VideoInfo,
    },
    AppState,
};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    Json,
};
use percent_encoding::percent_decode_str;

// ===================================================================
//                          CONFIG HANDLERS
// ===================================================================

/// # GET /config - Returns the current application configuration.
pub async fn get_config(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let config = state.config.read().unwrap().clone();
    Ok((StatusCode::OK, Json(config)))
}

/// # POST /config - Updates the configuration and saves it to disk.
pub async fn update_config(
    State(state): State<AppState>,
    Json(payload): Json<Config>,
) -> Result<impl IntoResponse, AppError> {
    *state.config.write().unwrap() = payload.clone();
    config::save_config(&payload).await?;
    tracing::info!("Configuration updated and saved.");
    Ok((StatusCode::OK, Json(payload)))
}

// ===================================================================
//                          SESSION HANDLERS
// ===================================================================

/// # GET /info - Fetches metadata for a URL and stores it as the session video.
pub async fn fetch_info(
    State(state): State<AppState>,
    Query(params): Query<InfoRequest>,
) -> Result<Json<VideoInfo>, AppError> {
    let info = state.orchestrator.fetch_info(&params.url).await?;
    Ok(Json(info))
}

/// # GET /state - Returns the full orchestration snapshot.
pub async fn get_state(State(state): State<AppState>) -> Json<SessionSnapshot> {
    Json(state.orchestrator.snapshot())
}

/// # POST /select - Selects a format by id, or clears the selection.
pub async fn select_format(
    State(state): State<AppState>,
    Json(payload): Json<SelectRequest>,
) -> Result<Json<SessionSnapshot>, AppError> {
    state.orchestrator.select_format(payload.format_id)?;
    Ok(Json(state.orchestrator.snapshot()))
}

/// # POST /audio-only - Toggles audio-only mode.
pub async fn set_audio_only(
    State(state): State<AppState>,
    Json(payload): Json<AudioOnlyRequest>,
) -> Json<SessionSnapshot> {
    state.orchestrator.set_audio_only(payload.enabled);
    Json(state.orchestrator.snapshot())
}

/// # POST /download - Starts the download for the current session.
pub async fn start_download(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    state.orchestrator.start_download()?;
    Ok((
        StatusCode::ACCEPTED,
        Json(DownloadResponse {
            message: "Download started successfully".to_string(),
        }),
    ))
}

/// # POST /cancel - Cancels the in-flight download, if any.
pub async fn cancel_download(State(state): State<AppState>) -> Json<SessionSnapshot> {
    state.orchestrator.cancel();
    Json(state.orchestrator.snapshot())
}

/// # POST /reset - Returns the session to a fresh Idle state.
pub async fn reset_session(State(state): State<AppState>) -> Json<SessionSnapshot> {
    state.orchestrator.reset();
    Json(state.orchestrator.snapshot())
}

/// # POST /tool/update - Runs the extractor self-update.
pub async fn update_tool(State(state): State<AppState>) -> Json<ToolUpdateResponse> {
    let status = state.orchestrator.update_tool().await;
    Json(ToolUpdateResponse { status })
}

// ===================================================================
//                          LIBRARY HANDLERS
// ===================================================================

/// # GET /library - Lists downloaded files across every known location.
pub async fn list_library(
    State(state): State<AppState>,
    Query(query): Query<LibraryQuery>,
) -> Result<impl IntoResponse, AppError> {
    let filter = LibraryFilter::parse(query.filter.as_deref())?;
    let config = state.config.read().unwrap().clone();
    Ok(Json(library::scan(&config, filter)))
}

/// # GET /files/:name - Serves a single library file by its file name.
pub async fn get_library_file(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let decoded_name = percent_decode_str(&name).decode_utf8_lossy().to_string();
    let config = state.config.read().unwrap().clone();
    let entry = library::find_by_file_name(&config, &decoded_name)
        .ok_or_else(|| AppError::NotFound(format!("File '{}' not found.", decoded_name)))?;

    let file = tokio::fs::File::open(&entry.path)
        .await
        .map_err(|_| AppError::NotFound(format!("File '{}' not found.", decoded_name)))?;
    let stream = tokio_util::io::ReaderStream::new(file);
    let body = Body::from_stream(stream);

    let mut headers = HeaderMap::new();
    let disposition = format!("attachment; filename=\"{}\"", decoded_name);
    headers.insert(header::CONTENT_DISPOSITION, HeaderValue::from_str(&disposition).unwrap());

    Ok((headers, body))
}

/// # DELETE /files/:name - Deletes a library file and returns a fresh scan.
pub async fn delete_library_file(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let decoded_name = percent_decode_str(&name).decode_utf8_lossy().to_string();
    let config = state.config.read().unwrap().clone();
    let entry = library::find_by_file_name(&config, &decoded_name)
        .ok_or_else(|| AppError::NotFound(format!("File '{}' not found.", decoded_name)))?;

    library::delete_file(&config, &entry)?;
    tracing::info!("Deleted library file: {}", entry.path.display());
    Ok(Json(library::scan(&config, LibraryFilter::All)))
}
