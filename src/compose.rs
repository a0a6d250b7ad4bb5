//! Turning a resolution result into the HTTP response the caller sees.

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::{error, info, warn};

use crate::error::ResolveError;
use crate::extract::ResolvedLink;
use crate::fetch;
use crate::models::DownloadResponse;

const FALLBACK_FILENAME: &str = "download";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    /// JSON descriptor, or the proxied file bytes when `stream` is set.
    Json { stream: bool },
    /// `302` to the direct link; errors as plain text.
    Redirect,
}

pub async fn compose(
    resolved: Result<ResolvedLink, ResolveError>,
    flavor: Flavor,
    files: &reqwest::Client,
) -> Response {
    let result = match (resolved, flavor) {
        (Err(e), Flavor::Redirect) => {
            log_failure(&e);
            return e.into_plain();
        }
        (Ok(link), Flavor::Redirect) => Ok(redirect(&link)),
        (Ok(link), Flavor::Json { stream: false }) => Ok(describe(&link)),
        (Ok(link), Flavor::Json { stream: true }) => stream_file(files, &link).await,
        (Err(e), Flavor::Json { .. }) => Err(e),
    };

    result.unwrap_or_else(|e| {
        log_failure(&e);
        e.into_response()
    })
}

pub fn describe(link: &ResolvedLink) -> Response {
    let body = DownloadResponse {
        success: true,
        filename: link.filename(),
        direct_link: link.as_str().to_string(),
    };
    (StatusCode::OK, Json(body)).into_response()
}

pub fn redirect(link: &ResolvedLink) -> Response {
    match HeaderValue::from_str(link.as_str()) {
        Ok(location) => (StatusCode::FOUND, [(header::LOCATION, location)]).into_response(),
        Err(e) => ResolveError::Unexpected(format!("unusable redirect target: {}", e)).into_plain(),
    }
}

/// Second GET against the direct link, piped through unchanged.
pub async fn stream_file(
    files: &reqwest::Client,
    link: &ResolvedLink,
) -> Result<Response, ResolveError> {
    let upstream = fetch::get_checked(files, link.as_str()).await?;

    let mut headers = HeaderMap::new();
    for name in [header::CONTENT_TYPE, header::CONTENT_LENGTH] {
        if let Some(value) = upstream.headers().get(&name) {
            headers.insert(name, value.clone());
        }
    }
    let disposition = content_disposition(&link.filename());
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&disposition)
            .map_err(|e| ResolveError::Unexpected(format!("bad Content-Disposition: {}", e)))?,
    );

    info!(direct_link = link.as_str(), "streaming file");
    let body = Body::from_stream(upstream.bytes_stream());
    Ok((StatusCode::OK, headers, body).into_response())
}

/// `attachment; filename="…"`, with an RFC 5987 parameter added whenever the
/// quoted form had to be altered.
pub fn content_disposition(filename: &str) -> String {
    let name = if filename.is_empty() {
        FALLBACK_FILENAME
    } else {
        filename
    };
    let quoted: String = name
        .chars()
        .map(|c| {
            if c.is_ascii() && !c.is_ascii_control() && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if quoted == name {
        format!("attachment; filename=\"{}\"", quoted)
    } else {
        format!(
            "attachment; filename=\"{}\"; filename*=UTF-8''{}",
            quoted,
            urlencoding::encode(name)
        )
    }
}

fn log_failure(e: &ResolveError) {
    if e.status().is_server_error() {
        error!(kind = e.kind(), details = e.details(), "{}", e);
    } else {
        warn!(kind = e.kind(), details = e.details(), "{}", e);
    }
}
