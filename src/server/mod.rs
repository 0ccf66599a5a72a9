use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::export::SnapshotPaths;

pub mod range;
pub mod routes;

pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Server state
pub struct AppState {
    /// Path of the current snapshot; opened fresh for every request
    pub snapshot_path: PathBuf,
    /// Name advertised in `Content-Disposition`
    pub file_name: String,
    pub chunk_size: usize,
    pub version: String,
    pub required: bool,
    pub description: String,
}

impl AppState {
    pub fn new(paths: &SnapshotPaths) -> Self {
        Self {
            snapshot_path: paths.current.clone(),
            file_name: paths.file_name(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            version: "1.0.0".to_string(),
            required: true,
            description: "Latest podcast database export".to_string(),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(routes::root))
        .route(
            "/download_latest_file",
            get(routes::download_latest_file).head(routes::head_latest_file),
        )
        .route("/database/latest", get(routes::database_latest))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn start_server(addr: SocketAddr, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = router(state);

    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request, StatusCode};
    use tower::ServiceExt;

    fn state_with_file(dir: &std::path::Path, contents: Option<&[u8]>) -> Arc<AppState> {
        let paths = SnapshotPaths::new(dir, &dir.join("backup"), "snap.db");
        if let Some(contents) = contents {
            std::fs::write(&paths.current, contents).unwrap();
        }
        let mut state = AppState::new(&paths);
        state.chunk_size = 64;
        Arc::new(state)
    }

    fn request(method: Method, uri: &str, range: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(range) = range {
            builder = builder.header(header::RANGE, range);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn thousand_bytes() -> Vec<u8> {
        (0..1000u32).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_root_is_alive() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(state_with_file(dir.path(), None));
        let response = app.oneshot(request(Method::GET, "/", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_full_download() {
        let dir = tempfile::tempdir().unwrap();
        let data = thousand_bytes();
        let app = router(state_with_file(dir.path(), Some(&data)));

        let response = app
            .oneshot(request(Method::GET, "/download_latest_file", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "1000");
        assert_eq!(response.headers()[header::ACCEPT_RANGES], "bytes");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"snap.db\""
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), data.as_slice());
    }

    #[tokio::test]
    async fn test_partial_download() {
        let dir = tempfile::tempdir().unwrap();
        let data = thousand_bytes();
        let app = router(state_with_file(dir.path(), Some(&data)));

        let response = app
            .oneshot(request(Method::GET, "/download_latest_file", Some("bytes=0-99")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 0-99/1000");
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "100");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), &data[..100]);
    }

    #[tokio::test]
    async fn test_open_ended_range_from_middle() {
        let dir = tempfile::tempdir().unwrap();
        let data = thousand_bytes();
        let app = router(state_with_file(dir.path(), Some(&data)));

        let response = app
            .oneshot(request(Method::GET, "/download_latest_file", Some("bytes=950-")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 950-999/1000");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), &data[950..]);
    }

    #[tokio::test]
    async fn test_range_beyond_end_is_416() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(state_with_file(dir.path(), Some(&thousand_bytes())));

        let response = app
            .oneshot(request(Method::GET, "/download_latest_file", Some("bytes=2000-")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes */1000");
    }

    #[tokio::test]
    async fn test_malformed_range_serves_full_file() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(state_with_file(dir.path(), Some(&thousand_bytes())));

        let response = app
            .oneshot(request(Method::GET, "/download_latest_file", Some("bytes=abc")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "1000");
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with_file(dir.path(), None);

        for uri in ["/download_latest_file", "/database/latest"] {
            let response = router(Arc::clone(&state))
                .oneshot(request(Method::GET, uri, None))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_head_reports_size() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(state_with_file(dir.path(), Some(&thousand_bytes())));

        let response = app
            .oneshot(request(Method::HEAD, "/download_latest_file", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "1000");
        assert_eq!(response.headers()[header::ACCEPT_RANGES], "bytes");
    }

    #[tokio::test]
    async fn test_version_info() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(state_with_file(dir.path(), Some(&thousand_bytes())));

        let response = app
            .oneshot(request(Method::GET, "/database/latest", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let info: routes::VersionInfo = serde_json::from_slice(&body).unwrap();
        assert_eq!(info.size, 1000);
        assert_eq!(info.url, "/download_latest_file");
        assert_eq!(info.hash, None);
        assert!(info.required);
    }
}
