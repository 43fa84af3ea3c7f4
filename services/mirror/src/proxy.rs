//! The request handler: route, then answer locally or forward upstream

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{StatusCode, Uri, header, request};
use axum::response::{IntoResponse, Response};
use http_body_util::BodyExt as _;
use percent_encoding::percent_decode_str;

use crate::error::{InternalError, MirrorResult};
use crate::route::{API_VERSION, API_VERSION_HEADER, RequestPath, ResourceKind, Route, route};
use crate::upstream::Upstream;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Handle any request the router receives.
pub(crate) async fn serve(
    State(upstream): State<Arc<Upstream>>,
    request: Request,
) -> MirrorResult<Response> {
    let (parts, _body) = request.into_parts();
    let path = percent_decode_str(parts.uri.path())
        .decode_utf8_lossy()
        .into_owned();

    match route(&upstream, &parts.method, &path).await? {
        Route::VersionCheck => Ok([(API_VERSION_HEADER, API_VERSION)].into_response()),
        Route::Unmatched => Ok(StatusCode::OK.into_response()),
        Route::Proxy {
            path: request_path,
            url,
        } => forward(&upstream, parts, &path, &request_path, url).await,
    }
}

async fn forward(
    upstream: &Upstream,
    parts: request::Parts,
    path: &str,
    request_path: &RequestPath,
    url: Uri,
) -> MirrorResult<Response> {
    tracing::info!("{} {} -> {}", parts.method, path, url);

    let client = upstream.client().await?;
    let mut request = client.request(parts.method, url.clone());
    if let Some(headers) = request.headers_mut() {
        for (name, value) in &parts.headers {
            if *name == header::HOST || *name == header::AUTHORIZATION {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }
    }

    let upstream_response = request
        .send()
        .await
        .map_err(|source| InternalError::Proxy { url, source })?;
    let (_, head, body) = upstream_response.into_parts();

    // Blob bodies are not relayed; clients get the upstream status and headers only.
    let body = if request_path.kind == ResourceKind::Blobs {
        Body::empty()
    } else {
        Body::new(body.map_err(|error| {
            let error: BoxError = error.into();
            tracing::error!(%error, "copying upstream response body");
            error
        }))
    };

    let mut response = Response::new(body);
    *response.status_mut() = head.status;

    let headers = response.headers_mut();
    for (name, value) in &head.headers {
        if *name == header::CONNECTION || *name == header::TRANSFER_ENCODING {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    Ok(response)
}
