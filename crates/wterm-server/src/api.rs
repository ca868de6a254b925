//! HTTP surface: the multiplexed WebSocket endpoint, one-shot file
//! transfers and the profile listing.

use crate::backend;
use crate::config::ServerConfig;
use crate::dispatcher::{serve_connection, ConnectionContext};
use crate::transfer::TransferRegistry;
use crate::transport::websocket::split_socket;
use axum::body::Body;
use axum::extract::multipart::Field;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use wterm_core::{WtermError, WtermResult};

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub transfers: Arc<TransferRegistry>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(open_socket))
        .route("/api/config", get(list_profiles))
        .route("/api/download", get(download).options(preflight))
        .route("/api/upload", post(upload).options(preflight))
        .layer(DefaultBodyLimit::disable())
        .layer(middleware::map_response(allow_any_origin))
        .with_state(state)
}

async fn allow_any_origin(mut res: Response) -> Response {
    res.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    res
}

async fn preflight() -> impl IntoResponse {
    [
        (header::ACCESS_CONTROL_ALLOW_METHODS, "GET, POST, OPTIONS"),
        (header::ACCESS_CONTROL_ALLOW_HEADERS, "*"),
    ]
}

#[derive(Debug, Deserialize)]
struct IdQuery {
    id: Option<String>,
}

impl IdQuery {
    fn parse<T: std::str::FromStr>(&self) -> Option<T> {
        self.id.as_deref().and_then(|s| s.trim().parse().ok())
    }
}

fn error(status: StatusCode, msg: &'static str) -> Response {
    (status, msg).into_response()
}

async fn open_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<IdQuery>,
) -> Response {
    let Some(profile_id) = query.parse::<usize>() else {
        return error(StatusCode::BAD_REQUEST, "missing or invalid profile id");
    };
    let Some(profile) = state.config.profile(profile_id) else {
        return error(StatusCode::BAD_REQUEST, "unknown profile");
    };
    info!(profile_id, name = profile.name(), "websocket connection");

    let backend = backend::from_profile(profile);
    let ctx = ConnectionContext {
        transfers: state.transfers.clone(),
        picker: None,
    };
    ws.on_upgrade(move |socket| async move {
        let (sink, stream) = split_socket(socket);
        match serve_connection(sink, stream, backend, ctx).await {
            Ok(()) => debug!(profile_id, "connection finished"),
            Err(e) => warn!(profile_id, error = %e, "connection ended with error"),
        }
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProfileEntry {
    id: usize,
    name: String,
    url: String,
    protocol: &'static str,
    fix_size: bool,
}

async fn list_profiles(State(state): State<AppState>, headers: HeaderMap) -> Json<Vec<ProfileEntry>> {
    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}:{}", state.config.listen, state.config.port));
    let entries = state
        .config
        .profiles
        .iter()
        .enumerate()
        .map(|(i, profile)| ProfileEntry {
            id: i + 1,
            name: profile.name().to_string(),
            url: format!("ws://{host}/ws?id={}", i + 1),
            protocol: "standard",
            fix_size: false,
        })
        .collect();
    Json(entries)
}

/// `filename` parameter safe for a header value.
fn attachment(name: &str) -> String {
    let clean: String = name
        .chars()
        .filter(|c| c.is_ascii() && !c.is_ascii_control() && *c != '"' && *c != '\\')
        .collect();
    format!("attachment; filename=\"{clean}\"")
}

async fn download(State(state): State<AppState>, Query(query): Query<IdQuery>) -> Response {
    let Some(id) = query.parse::<u64>() else {
        return error(StatusCode::BAD_REQUEST, "missing or invalid id");
    };
    let Some(handle) = state.transfers.take_download(id).await else {
        return error(StatusCode::NOT_FOUND, "no such download");
    };
    debug!(id, name = %handle.name, "serving download");

    let body = Body::from_stream(ReaderStream::new(handle.reader));
    (
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, attachment(&handle.name)),
        ],
        body,
    )
        .into_response()
}

async fn upload(
    State(state): State<AppState>,
    Query(query): Query<IdQuery>,
    mut multipart: Multipart,
) -> Response {
    let Some(id) = query.parse::<u64>() else {
        return error(StatusCode::BAD_REQUEST, "missing or invalid id");
    };
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                debug!(id, error = %e, "bad multipart body");
                return error(StatusCode::BAD_REQUEST, "malformed multipart body");
            }
        };
        if field.name() != Some("file") {
            continue;
        }
        let Some(mut writer) = state.transfers.take_upload(id).await else {
            return error(StatusCode::NOT_FOUND, "no such upload");
        };
        return match write_field(field, &mut writer).await {
            Ok(written) => {
                debug!(id, written, "upload stored");
                StatusCode::OK.into_response()
            }
            Err(e) => {
                warn!(id, error = %e, "upload failed");
                error(StatusCode::INTERNAL_SERVER_ERROR, "upload failed")
            }
        };
    }
    error(StatusCode::BAD_REQUEST, "missing file field")
}

async fn write_field(mut field: Field<'_>, writer: &mut backend::FileWriter) -> WtermResult<u64> {
    let mut written = 0u64;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| WtermError::Transport(format!("multipart: {e}")))?
    {
        writer.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    writer.shutdown().await?;
    Ok(written)
}
