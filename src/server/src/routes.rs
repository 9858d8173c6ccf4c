//! HTTP routes.
//!
//! - `GET /api/pack?image=<ref>` streams pipeline events as server-sent events
//! - `GET /download/<filename>` serves finished artifacts from the output directory
//! - `OPTIONS *` answers CORS preflight

use std::convert::Infallible;
use std::sync::Arc;

use hyper::header::{
    HeaderMap, HeaderName, HeaderValue, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL, CONNECTION, CONTENT_DISPOSITION, CONTENT_LENGTH,
    CONTENT_TYPE,
};
use hyper::{Body, Method, Request, Response, StatusCode, Uri};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::io::ReaderStream;

use packer_core::config::{PackerConfig, DOWNLOAD_PREFIX};
use packer_core::event::EventEmitter;
use packer_runtime::artifact::is_lock_file;
use packer_runtime::PackagingPipeline;

/// Path of the pack endpoint.
pub const PACK_PATH: &str = "/api/pack";

/// Shared state handed to every request.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<PackerConfig>,
    pub pipeline: PackagingPipeline,
}

/// Entry point for every request.
pub async fn handle(state: AppState, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let (parts, _body) = req.into_parts();
    let mut response = route(&state, &parts.method, &parts.uri).await;
    apply_cors(response.headers_mut());
    tracing::debug!(
        method = %parts.method,
        path = parts.uri.path(),
        status = response.status().as_u16(),
        "Handled request"
    );
    Ok(response)
}

async fn route(state: &AppState, method: &Method, uri: &Uri) -> Response<Body> {
    let path = uri.path();

    if method == Method::OPTIONS {
        return status_only(StatusCode::NO_CONTENT);
    }
    if method != Method::GET {
        return text(StatusCode::NOT_FOUND, "Not Found");
    }

    if path == PACK_PATH {
        return pack(state, uri.query());
    }
    if let Some(name) = path
        .strip_prefix(DOWNLOAD_PREFIX)
        .and_then(|rest| rest.strip_prefix('/'))
    {
        return download(state, name).await;
    }

    text(StatusCode::NOT_FOUND, "Not Found")
}

/// Start a pipeline run and stream its events back.
///
/// The pipeline runs in its own task; dropping the response body (client
/// disconnect) closes the event channel, which the pipeline observes.
fn pack(state: &AppState, query: Option<&str>) -> Response<Body> {
    let image = query_param(query, "image").unwrap_or_default();
    let (emitter, receiver) = EventEmitter::channel(state.config.event_buffer);

    tracing::info!(image = %image, "Pack requested");
    let pipeline = state.pipeline.clone();
    tokio::spawn(async move {
        pipeline.run(&image, &emitter).await;
    });

    let frames = ReceiverStream::new(receiver).map(Ok::<_, Infallible>);
    let mut response = Response::new(Body::wrap_stream(frames));
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    response
}

/// Stream an artifact file from the output directory.
async fn download(state: &AppState, name: &str) -> Response<Body> {
    if !is_servable_name(name) {
        return text(StatusCode::NOT_FOUND, "Not Found");
    }

    let path = state.config.output_dir.join(name);
    let file = match tokio::fs::File::open(&path).await {
        Ok(f) => f,
        Err(_) => return text(StatusCode::NOT_FOUND, "Not Found"),
    };
    let len = match file.metadata().await {
        Ok(m) if m.is_file() => m.len(),
        _ => return text(StatusCode::NOT_FOUND, "Not Found"),
    };

    tracing::info!(file = name, bytes = len, "Serving artifact");

    let mut response = Response::new(Body::wrap_stream(ReaderStream::new(file)));
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/x-tar"));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", name)) {
        headers.insert(CONTENT_DISPOSITION, value);
    }
    response
}

/// Only plain artifact names are served: no separators, no hidden files, no locks.
fn is_servable_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !is_lock_file(name)
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// First value of a form-urlencoded query parameter.
fn query_param(query: Option<&str>, key: &str) -> Option<String> {
    form_urlencoded::parse(query?.as_bytes())
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

fn apply_cors(headers: &mut HeaderMap) {
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
}

fn status_only(status: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}

fn text(status: StatusCode, message: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
