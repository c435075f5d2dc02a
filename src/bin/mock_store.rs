//! Mock Remote Store
//!
//! In-memory HTTP object store implementing the contract the recorder's
//! uploader speaks. Any leading path (bucket) is ignored; the last two
//! segments are `{owner}/{filename}`.
//!
//! Routes:
//! - `GET  .../{owner}/`           - JSON array of keys, 404 when the owner has none
//! - `GET  .../{owner}/{filename}` - stored object
//! - `PUT  .../{owner}/{filename}` - store an object
//! - `GET  /health`
//!
//! Usage:
//!   cargo run --bin mock-store -- --port 9000
//!   cargo run --bin mock-store -- --port 9000 --fail-key eddy/tripMotions_eddy_...json

use bytes::Bytes;
use clap::Parser;
use http_body_util::{BodyExt, Full};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;
use trip_recorder::io::remote_store::{object_key, RemoteStore, ARCHIVE_CONTENT_TYPE};
use trip_recorder::io::MemoryRemoteStore;

#[derive(Parser, Debug)]
#[command(name = "mock-store")]
#[command(about = "In-memory object store for local upload testing")]
struct Args {
    /// TCP port to listen on
    #[arg(short, long, default_value = "9000")]
    port: u16,

    /// Reject PUTs of this key (`{owner}/{filename}`); repeatable
    #[arg(long)]
    fail_key: Vec<String>,
}

fn respond(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// Decode `%XX` escapes in one path segment
fn percent_decode(segment: &str) -> String {
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let decoded = std::str::from_utf8(&bytes[i + 1..i + 3])
                .ok()
                .and_then(|hex| u8::from_str_radix(hex, 16).ok());
            if let Some(b) = decoded {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Last two path segments, decoded; the second is empty for a listing
fn owner_and_file(path: &str) -> Option<(String, String)> {
    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    if segments.len() < 2 {
        return None;
    }
    let owner = percent_decode(segments[segments.len() - 2]);
    let file = percent_decode(segments[segments.len() - 1]);
    if owner.is_empty() {
        return None;
    }
    Some((owner, file))
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    store: Arc<MemoryRemoteStore>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    if method == Method::GET && path == "/health" {
        return Ok(respond(StatusCode::OK, "text/plain", "ok"));
    }

    let Some((owner, file)) = owner_and_file(&path) else {
        return Ok(respond(StatusCode::NOT_FOUND, "text/plain", "Not Found"));
    };

    let response = match (method, file.is_empty()) {
        (Method::GET, true) => match store.keys(&owner) {
            Some(keys) => match serde_json::to_vec(&keys) {
                Ok(body) => respond(StatusCode::OK, ARCHIVE_CONTENT_TYPE, body),
                Err(e) => {
                    error!(error = %e, "listing_encode_failed");
                    respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", "encode failed")
                }
            },
            None => respond(StatusCode::NOT_FOUND, "text/plain", "no objects"),
        },
        (Method::GET, false) => match store.get(&object_key(&owner, &file)) {
            Some(object) => respond(StatusCode::OK, ARCHIVE_CONTENT_TYPE, object.body),
            None => respond(StatusCode::NOT_FOUND, "text/plain", "Not Found"),
        },
        (Method::PUT, false) => {
            let content_type = req
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or(ARCHIVE_CONTENT_TYPE)
                .to_string();
            let body = match req.into_body().collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    warn!(error = %e, "put_body_read_failed");
                    return Ok(respond(StatusCode::BAD_REQUEST, "text/plain", "bad body"));
                }
            };
            let key = object_key(&owner, &file);
            let size = body.len();
            match store.put_object(&key, body, &content_type).await {
                Ok(()) => {
                    info!(key = %key, bytes = %size, "object_stored");
                    respond(StatusCode::CREATED, "text/plain", "")
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "object_rejected");
                    respond(StatusCode::SERVICE_UNAVAILABLE, "text/plain", e.to_string())
                }
            }
        }
        _ => respond(StatusCode::METHOD_NOT_ALLOWED, "text/plain", "Method Not Allowed"),
    };
    Ok(response)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    let args = Args::parse();
    let store = Arc::new(MemoryRemoteStore::new());
    for key in &args.fail_key {
        store.fail_key(key);
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = TcpListener::bind(addr).await?;
    info!(port = %args.port, failing_keys = %args.fail_key.len(), "mock_store_started");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let store = store.clone();
                        tokio::spawn(async move {
                            let service = service_fn(move |req| handle_request(req, store.clone()));
                            if let Err(e) =
                                http1::Builder::new().serve_connection(io, service).await
                            {
                                error!(error = %e, "mock_store_http_error");
                            }
                        });
                    }
                    Err(e) => error!(error = %e, "mock_store_accept_error"),
                }
            }
            _ = &mut ctrl_c => {
                info!(objects = %store.len(), "mock_store_shutdown");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_and_file() {
        assert_eq!(owner_and_file("/eddy/"), Some(("eddy".into(), String::new())));
        assert_eq!(
            owner_and_file("/trips/eddy/a%20b.json"),
            Some(("eddy".into(), "a b.json".into()))
        );
        assert_eq!(owner_and_file("/"), None);
        assert_eq!(owner_and_file("//x"), None);
    }

    #[test]
    fn test_percent_decode_passthrough() {
        assert_eq!(percent_decode("eddy@example.com"), "eddy@example.com");
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("%zz"), "%zz");
    }
}
