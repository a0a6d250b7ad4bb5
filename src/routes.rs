use std::any::Any;
use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info};

use crate::compose::{self, Flavor};
use crate::error::ResolveError;
use crate::extract::{self, ExtractionOutcome, ResolvedLink};
use crate::fetch::PageFetcher;
use crate::models::{DirectQuery, DownloadQuery, DownloadRequest};
use crate::validate::PageUrl;

/// Shared per-process handles. Nothing here is mutated by requests.
#[derive(Clone)]
pub struct AppState {
    pub fetcher: Arc<dyn PageFetcher>,
    pub files: reqwest::Client,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/download", get(download_query).post(download_body))
        .route("/direct", get(direct))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn download_query(
    State(state): State<AppState>,
    query: Result<Query<DownloadQuery>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => {
            debug!("rejected query: {}", rejection.body_text());
            return compose::compose(Err(ResolveError::InvalidInput), Flavor::Json { stream: false }, &state.files).await;
        }
    };
    let stream = query.stream_requested();
    let resolved = resolve(&state, query.url.as_deref()).await;
    compose::compose(resolved, Flavor::Json { stream }, &state.files).await
}

async fn download_body(
    State(state): State<AppState>,
    payload: Result<Json<DownloadRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            debug!("rejected body: {}", rejection.body_text());
            return compose::compose(Err(ResolveError::InvalidInput), Flavor::Json { stream: false }, &state.files).await;
        }
    };
    let resolved = resolve(&state, request.url.as_deref()).await;
    compose::compose(resolved, Flavor::Json { stream: request.stream }, &state.files).await
}

async fn direct(
    State(state): State<AppState>,
    query: Result<Query<DirectQuery>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => {
            debug!("rejected query: {}", rejection.body_text());
            return compose::compose(Err(ResolveError::InvalidInput), Flavor::Redirect, &state.files).await;
        }
    };
    let resolved = resolve(&state, query.url.as_deref()).await;
    compose::compose(resolved, Flavor::Redirect, &state.files).await
}

/// Validate, fetch, extract. The fetcher is never reached with an unvalidated URL.
async fn resolve(state: &AppState, raw_url: Option<&str>) -> Result<ResolvedLink, ResolveError> {
    let page_url = raw_url
        .and_then(PageUrl::parse)
        .ok_or(ResolveError::InvalidInput)?;

    info!(page_url = %page_url, mode = ?state.fetcher.mode(), "resolving");
    let content = state.fetcher.fetch(&page_url).await?;

    match extract::extract(&content) {
        ExtractionOutcome::Found(link) => Ok(link),
        ExtractionOutcome::NotFound => Err(ResolveError::LinkNotFound),
    }
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let details = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "handler panicked".to_string()
    };
    tracing::error!("handler panicked: {}", details);
    ResolveError::Unexpected(details).into_response()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::config::{Config, RenderMode};
    use crate::fetch::{self, FetchError, PageContent};
    use crate::models::{DownloadResponse, ErrorBody};

    const PAGE_URL: &str = "https://www.mediafire.com/file/abc123/name.zip/file";

    struct FakeFetcher {
        reply: Box<dyn Fn() -> Result<PageContent, FetchError> + Send + Sync>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PageFetcher for FakeFetcher {
        async fn fetch(&self, _url: &PageUrl) -> Result<PageContent, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.reply)()
        }

        fn mode(&self) -> RenderMode {
            RenderMode::Static
        }
    }

    fn app_with(
        reply: impl Fn() -> Result<PageContent, FetchError> + Send + Sync + 'static,
    ) -> (Router, Arc<FakeFetcher>) {
        let fetcher = Arc::new(FakeFetcher {
            reply: Box::new(reply),
            calls: AtomicUsize::new(0),
        });
        let state = AppState {
            fetcher: fetcher.clone(),
            files: fetch::stream_client(&Config::default()).unwrap(),
        };
        (create_router(state), fetcher)
    }

    fn button_page(href: &str) -> Result<PageContent, FetchError> {
        Ok(PageContent {
            html: format!(
                r#"<html><body><a class="input popsok" id="downloadButton" href="{}">Download (1.2MB)</a></body></html>"#,
                href
            ),
        })
    }

    fn download_uri(page_url: &str, stream: bool) -> String {
        format!(
            "/download?url={}&stream={}",
            urlencoding::encode(page_url),
            stream
        )
    }

    async fn get(app: Router, uri: &str) -> Response {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    async fn error_body(response: Response) -> ErrorBody {
        serde_json::from_slice(&body_bytes(response).await).unwrap()
    }

    async fn spawn_origin(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn resolves_to_json_descriptor() {
        let (app, _) = app_with(|| button_page("https://download.mediafire.com/name.zip?token=1"));

        let response = get(app, &download_uri(PAGE_URL, false)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body: DownloadResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert!(body.success);
        assert_eq!(body.filename, "name.zip");
        assert_eq!(body.direct_link, "https://download.mediafire.com/name.zip?token=1");
    }

    #[tokio::test]
    async fn missing_url_is_rejected_before_fetch() {
        let (app, fetcher) = app_with(|| button_page("https://download.mediafire.com/a.zip"));

        let response = get(app, "/download").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = error_body(response).await;
        assert_eq!(body.error, "Invalid or missing MediaFire URL.");
        assert!(body.details.is_none());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn off_host_url_is_rejected_before_fetch() {
        let (app, fetcher) = app_with(|| button_page("https://download.mediafire.com/a.zip"));

        for target in [
            "http://169.254.169.254/latest/meta-data/",
            "https://mediafire.com.evil.com/file/abc/x.zip",
            "https://www.mediafire.com/folder/abc/x",
        ] {
            let response = get(app.clone(), &download_uri(target, false)).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{target}");
        }
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn upstream_status_is_mirrored() {
        let (app, _) = app_with(|| Err(FetchError::Upstream { status: 403 }));

        let response = get(app, &download_uri(PAGE_URL, false)).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = error_body(response).await;
        assert_eq!(
            body.error,
            "Failed to retrieve file: Remote server responded with status 403."
        );
        assert_eq!(body.kind.as_deref(), Some("UpstreamError"));
        assert_eq!(body.details.as_deref(), Some("Request failed with status code 403"));
    }

    #[tokio::test]
    async fn network_failure_is_500_with_details() {
        let (app, _) = app_with(|| Err(FetchError::Network("ConnectError: refused".into())));

        let response = get(app, &download_uri(PAGE_URL, false)).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = error_body(response).await;
        assert_eq!(body.kind.as_deref(), Some("NetworkError"));
        assert_eq!(body.details.as_deref(), Some("ConnectError: refused"));
    }

    #[tokio::test]
    async fn placeholder_only_page_is_404() {
        let (app, _) = app_with(|| button_page("javascript:void(0)"));

        let response = get(app, &download_uri(PAGE_URL, false)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = error_body(response).await;
        assert!(body.error.starts_with("Direct download link not found"));
    }

    #[tokio::test]
    async fn undecodable_query_is_json_400() {
        let (app, fetcher) = app_with(|| button_page("https://download.mediafire.com/a.zip"));

        let encoded = urlencoding::encode(PAGE_URL);
        let uri = format!("/download?url={}&url={}", encoded, encoded);
        let response = get(app.clone(), &uri).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        let body = error_body(response).await;
        assert_eq!(body.error, "Invalid or missing MediaFire URL.");

        let uri = format!("/direct?url={}&url={}", encoded, encoded);
        let response = get(app, &uri).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let text = String::from_utf8(body_bytes(response).await).unwrap();
        assert_eq!(text, "Invalid or missing MediaFire URL.");

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn post_body_is_accepted() {
        let (app, _) = app_with(|| button_page("https://download.mediafire.com/x/report%202024.pdf"));

        let request = Request::builder()
            .method("POST")
            .uri("/download")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "url": PAGE_URL, "stream": false }).to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: DownloadResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body.filename, "report 2024.pdf");
    }

    #[tokio::test]
    async fn malformed_post_body_is_400() {
        let (app, fetcher) = app_with(|| button_page("https://download.mediafire.com/a.zip"));

        for payload in ["{not json", "{}", r#"{"url": 42}"#] {
            let request = Request::builder()
                .method("POST")
                .uri("/download")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(payload))
                .unwrap();
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{payload}");
        }
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stream_proxies_bytes_with_attachment_name() {
        let origin = Router::new().route(
            "/files/*name",
            axum::routing::get(|| async {
                ([(header::CONTENT_TYPE, "application/zip")], "PK\u{3}\u{4}payload")
            }),
        );
        let base = spawn_origin(origin).await;
        let link = format!("{}/files/name%20one.zip?token=1", base);
        let (app, _) = app_with(move || button_page(&link));

        let response = get(app, &download_uri(PAGE_URL, true)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_DISPOSITION).unwrap(),
            "attachment; filename=\"name one.zip\""
        );
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/zip"
        );
        assert_eq!(body_bytes(response).await, b"PK\x03\x04payload");
    }

    #[tokio::test]
    async fn failed_stream_fetch_mirrors_status() {
        let origin = Router::new().route(
            "/files/gone.zip",
            axum::routing::get(|| async { StatusCode::GONE }),
        );
        let base = spawn_origin(origin).await;
        let link = format!("{}/files/gone.zip", base);
        let (app, _) = app_with(move || button_page(&link));

        let response = get(app, &download_uri(PAGE_URL, true)).await;
        assert_eq!(response.status(), StatusCode::GONE);
        let body = error_body(response).await;
        assert_eq!(body.kind.as_deref(), Some("UpstreamError"));
    }

    #[tokio::test]
    async fn stream_flag_must_be_literal_true() {
        let (app, _) = app_with(|| button_page("https://download.mediafire.com/name.zip"));

        let uri = format!("/download?url={}&stream=yes", urlencoding::encode(PAGE_URL));
        let response = get(app, &uri).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(header::CONTENT_DISPOSITION).is_none());
    }

    #[tokio::test]
    async fn direct_redirects_to_link() {
        let (app, _) = app_with(|| button_page("https://download.mediafire.com/name.zip?token=1"));

        let uri = format!("/direct?url={}", urlencoding::encode(PAGE_URL));
        let response = get(app, &uri).await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "https://download.mediafire.com/name.zip?token=1"
        );
    }

    #[tokio::test]
    async fn direct_reports_errors_as_plain_text() {
        let (app, _) = app_with(|| button_page("#"));

        let uri = format!("/direct?url={}", urlencoding::encode(PAGE_URL));
        let response = get(app.clone(), &uri).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/plain"));
        let text = String::from_utf8(body_bytes(response).await).unwrap();
        assert!(text.starts_with("Direct download link not found"));

        let response = get(app, "/direct").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let text = String::from_utf8(body_bytes(response).await).unwrap();
        assert_eq!(text, "Invalid or missing MediaFire URL.");
    }

    #[tokio::test]
    async fn cors_allows_any_origin() {
        let (app, _) = app_with(|| button_page("https://download.mediafire.com/name.zip"));

        let request = Request::builder()
            .uri("/health")
            .header(header::ORIGIN, "https://client.example")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "*"
        );
    }

    #[tokio::test]
    async fn panics_become_unexpected_errors() {
        let (app, _) = app_with(|| panic!("boom"));

        let response = get(app, &download_uri(PAGE_URL, false)).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = error_body(response).await;
        assert_eq!(body.kind.as_deref(), Some("UnexpectedError"));
        assert_eq!(body.details.as_deref(), Some("boom"));
    }
}
