//! Edge proxy over the artifact tree.

pub mod routes;

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::index::layout::ArtifactLayout;
use routes::{error_response, route_request, ArtifactStore, HttpResponse};

pub fn router(layout: ArtifactLayout) -> Router {
    let store = Arc::new(ArtifactStore::new(layout));
    Router::new()
        .fallback(handle)
        .with_state(store)
        .layer(TraceLayer::new_for_http())
}

async fn handle(State(store): State<Arc<ArtifactStore>>, method: Method, uri: Uri) -> Response {
    let path = uri.path().to_string();
    let routed = tokio::task::spawn_blocking(move || route_request(&store, method.as_str(), &path)).await;
    let response = routed.unwrap_or_else(|err| {
        tracing::error!(error = %err, "route handler panicked");
        error_response(500, "Internal Server Error", "request failed")
    });
    into_axum(response)
}

fn into_axum(response: HttpResponse) -> Response {
    let status = StatusCode::from_u16(response.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let extra = response.extra_headers();
    let content_type = response.content_type;
    let mut out = (status, Body::from(response.body)).into_response();
    let headers = out.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    for &(name, value) in extra {
        headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
    }
    out
}

pub async fn serve(bind_addr: &str, layout: ArtifactLayout) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %bind_addr, root = %layout.root().display(), "edge proxy listening");
    axum::serve(listener, router(layout)).await
}
