use axum::body::{to_bytes, Body};
use axum::extract::Request;
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Request/response gzip codec for the HTTP surface.
///
/// Inbound: a `Content-Encoding: gzip` body is decompressed before routing;
/// a body that does not decode answers 400. A declared
/// `application/x-gzip` content type is rewritten to the type the target
/// surface actually speaks. Outbound: when the client accepts gzip and the
/// response is JSON or HTML, the body is compressed and marked.
pub async fn gzip_codec(request: Request, next: Next) -> Response {
    let accepts_gzip = header_contains(&request, header::ACCEPT_ENCODING, "gzip");

    let request = match decompress_request(request).await {
        Ok(request) => request,
        Err(response) => return response,
    };

    let response = next.run(request).await;
    if accepts_gzip {
        compress_response(response).await
    } else {
        response
    }
}

fn header_contains(request: &Request, name: header::HeaderName, needle: &str) -> bool {
    request
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains(needle))
}

async fn decompress_request(request: Request) -> Result<Request, Response> {
    if !header_contains(&request, header::CONTENT_ENCODING, "gzip") {
        return Ok(request);
    }

    let bad_request =
        || (StatusCode::BAD_REQUEST, "failed to decompress gzip body").into_response();

    let (mut parts, body) = request.into_parts();
    let compressed = to_bytes(body, usize::MAX)
        .await
        .map_err(|_| bad_request())?;

    let mut decoded = Vec::new();
    GzDecoder::new(compressed.as_ref())
        .read_to_end(&mut decoded)
        .map_err(|_| bad_request())?;

    parts.headers.remove(header::CONTENT_ENCODING);
    parts.headers.remove(header::CONTENT_LENGTH);
    let declared = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());
    if declared == Some("application/x-gzip") {
        let rewritten = if parts.uri.path().starts_with("/api/") {
            "application/json"
        } else {
            "text/plain"
        };
        parts
            .headers
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(rewritten));
    }

    Ok(Request::from_parts(parts, Body::from(decoded)))
}

fn is_compressible(response: &Response) -> bool {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| {
            value.starts_with("application/json") || value.starts_with("text/html")
        })
}

async fn compress_response(response: Response) -> Response {
    if !is_compressible(&response) {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let Ok(plain) = to_bytes(body, usize::MAX).await else {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    let compressed = encoder
        .write_all(&plain)
        .and_then(|()| encoder.finish());
    match compressed {
        Ok(compressed) => {
            parts
                .headers
                .insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
            parts.headers.remove(header::CONTENT_LENGTH);
            Response::from_parts(parts, Body::from(compressed))
        }
        // Compression is opportunistic; fall back to the plain body.
        Err(_) => Response::from_parts(parts, Body::from(plain)),
    }
}
