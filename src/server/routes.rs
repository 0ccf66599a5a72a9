use std::io::SeekFrom;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::server::range;
use crate::server::AppState;
use crate::Error;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}

/// Snapshot metadata for clients deciding whether to download
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub required: bool,
    pub url: String,
    pub size: u64,
    pub hash: Option<String>,
    pub description: String,
}

/// Error response carrying an optional `Content-Range` for 416s
pub struct ApiError {
    status: StatusCode,
    detail: String,
    content_range: Option<String>,
}

impl ApiError {
    fn from_error(error: Error, total: Option<u64>) -> Self {
        match error {
            Error::FileNotReady(_) => Self {
                status: StatusCode::NOT_FOUND,
                detail: "Database file not found".to_string(),
                content_range: None,
            },
            Error::Range(reason) => Self {
                status: StatusCode::RANGE_NOT_SATISFIABLE,
                detail: format!("Range not satisfiable: {}", reason),
                content_range: total.map(|t| format!("bytes */{}", t)),
            },
            other => {
                tracing::error!(error = %other, "Snapshot request failed");
                Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    detail: "Internal server error".to_string(),
                    content_range: None,
                }
            }
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self::from_error(error, None)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(ErrorResponse { detail: self.detail })).into_response();
        if let Some(value) = self.content_range.and_then(|v| HeaderValue::from_str(&v).ok()) {
            response.headers_mut().insert(header::CONTENT_RANGE, value);
        }
        response
    }
}

pub async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({"message": "Snapshot server is running"}))
}

/// Open the current snapshot. The handle keeps reading the same file even if
/// an export renames a new one into place mid-download.
async fn open_snapshot(state: &AppState) -> Result<(File, u64), Error> {
    let file = match File::open(&state.snapshot_path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::FileNotReady(state.snapshot_path.clone()))
        }
        Err(e) => return Err(e.into()),
    };
    let size = file.metadata().await?.len();
    Ok((file, size))
}

fn file_headers(state: &AppState, length: u64) -> Result<HeaderMap, Error> {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
    let disposition = format!("attachment; filename=\"{}\"", state.file_name);
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&disposition)
            .map_err(|e| Error::Config(format!("invalid snapshot file name: {}", e)))?,
    );
    Ok(headers)
}

pub async fn download_latest_file(
    State(state): State<Arc<AppState>>,
    request_headers: HeaderMap,
) -> Result<Response, ApiError> {
    let (mut file, total) = open_snapshot(&state).await?;

    let range_header = request_headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok());
    let selection = range::select(range_header, total).map_err(|e| ApiError::from_error(e, Some(total)))?;

    let length = selection.len(total);
    let mut headers = file_headers(&state, length)?;
    let status = match selection.content_range(total) {
        Some(content_range) => {
            headers.insert(
                header::CONTENT_RANGE,
                HeaderValue::from_str(&content_range).map_err(|e| Error::Range(e.to_string()))?,
            );
            StatusCode::PARTIAL_CONTENT
        }
        None => StatusCode::OK,
    };

    if selection.start() > 0 {
        file.seek(SeekFrom::Start(selection.start())).await.map_err(Error::from)?;
    }

    tracing::debug!(?selection, total, "Serving snapshot");
    let body = Body::from_stream(chunked(file, length, state.chunk_size));
    Ok((status, headers, body).into_response())
}

pub async fn head_latest_file(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let (_file, total) = open_snapshot(&state).await?;
    let headers = file_headers(&state, total)?;
    Ok((StatusCode::OK, headers).into_response())
}

pub async fn database_latest(State(state): State<Arc<AppState>>) -> Result<Json<VersionInfo>, ApiError> {
    let (_file, size) = open_snapshot(&state).await?;
    Ok(Json(VersionInfo {
        version: state.version.clone(),
        required: state.required,
        url: "/download_latest_file".to_string(),
        size,
        hash: None,
        description: state.description.clone(),
    }))
}

/// Stream `remaining` bytes from the file's current position in chunks
fn chunked(
    file: File,
    remaining: u64,
    chunk_size: usize,
) -> impl futures::Stream<Item = std::io::Result<Bytes>> + Send {
    let chunk_size = chunk_size.max(1);
    futures::stream::unfold((file, remaining), move |(mut file, remaining)| async move {
        if remaining == 0 {
            return None;
        }
        let want = remaining.min(chunk_size as u64) as usize;
        let mut buf = vec![0u8; want];
        match file.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((Ok(Bytes::from(buf)), (file, remaining - n as u64)))
            }
            Err(e) => Some((Err(e), (file, 0))),
        }
    })
}
