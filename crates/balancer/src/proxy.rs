//! HTTP handlers for the public and private listeners.
//!
//! The public side answers `/robots.txt` and `/health` itself and forwards
//! tile requests, unchanged, to the node the registry picks. The private
//! side speaks the node registration protocol.

use std::convert::Infallible;
use std::error::Error as StdError;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tracing::{debug, error};

use corelib::node::NodeId;

use crate::error::BalancerError;
use crate::protocol::{RegisterResponse, Registration};
use crate::registry::Registry;
use crate::route::TileRequest;

pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

const ROBOTS_TXT: &str = "User-agent: *\nDisallow: /\n";
const HEALTH_BODY: &str = r#"{"ok":true}"#;
const ACK_BODY: &str = r#"{"acknowledged":true}"#;
const UNRECOGNIZED: &str = "Unrecognized URL";
const NO_SERVERS: &str = "No servers found to handle the request";
const NODES_PREFIX: &str = "/nodes/";

/// State shared by every connection on both listeners.
pub(crate) struct Front {
    registry: Arc<Registry>,
    client: Client<HttpConnector, ProxyBody>,
    register_body: Bytes,
}

impl Front {
    pub(crate) fn new(registry: Arc<Registry>) -> Result<Self, BalancerError> {
        // Serialized once; every node gets the same reply.
        let reply = RegisterResponse {
            token: registry.token().to_string(),
            check_interval: registry.health_config().interval.as_millis() as u64,
        };
        let register_body = serde_json::to_vec(&reply)
            .map_err(|e| BalancerError::Validation(format!("failed to encode reply: {}", e)))?;

        Ok(Self {
            registry,
            client: Client::builder(TokioExecutor::new()).build_http(),
            register_body: Bytes::from(register_body),
        })
    }
}

fn full(body: impl Into<Bytes>) -> ProxyBody {
    Full::new(body.into()).map_err(|never| match never {}).boxed()
}

fn respond(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Response<ProxyBody> {
    let mut response = Response::new(full(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn text(status: StatusCode, body: impl Into<Bytes>) -> Response<ProxyBody> {
    respond(status, "text/plain", body)
}

fn json(status: StatusCode, body: impl Into<Bytes>) -> Response<ProxyBody> {
    respond(status, "application/json", body)
}

fn path_and_query(req: &Request<Incoming>) -> &str {
    req.uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| req.uri().path())
}

pub(crate) async fn handle_public(
    front: Arc<Front>,
    _peer: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<ProxyBody>, Infallible> {
    let url = path_and_query(&req);
    if url == "/robots.txt" {
        return Ok(text(StatusCode::OK, ROBOTS_TXT));
    }
    if url == "/health" {
        return Ok(json(StatusCode::OK, HEALTH_BODY));
    }

    let Some(tile) = TileRequest::parse(url) else {
        return Ok(text(StatusCode::NOT_FOUND, UNRECOGNIZED));
    };

    let Some(target) = front
        .registry
        .pick(&tile.layer, &tile.file, tile.z, tile.x, tile.y)
    else {
        metrics::counter!("balancer_proxy_misses_total").increment(1);
        debug!(request = %tile, "No node for tile");
        return Ok(text(StatusCode::NOT_FOUND, NO_SERVERS));
    };

    metrics::counter!("balancer_proxy_requests_total").increment(1);
    let upstream_url = format!("http://{}{}", target, url);
    let uri: Uri = match upstream_url.parse() {
        Ok(uri) => uri,
        Err(e) => return Ok(text(StatusCode::BAD_GATEWAY, e.to_string())),
    };

    let (mut parts, body) = req.into_parts();
    parts.uri = uri;
    let upstream = Request::from_parts(parts, body.boxed());

    match front.client.request(upstream).await {
        Ok(response) => Ok(response.map(|body| body.boxed())),
        Err(e) => {
            metrics::counter!("balancer_proxy_errors_total").increment(1);
            let message = error_chain(&e);
            if !is_routine_disconnect(&e) {
                error!(url = %upstream_url, error = %message, "Proxy request failed");
            }
            Ok(text(StatusCode::BAD_GATEWAY, message))
        }
    }
}

pub(crate) async fn handle_private(
    front: Arc<Front>,
    peer: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<ProxyBody>, Infallible> {
    let url = path_and_query(&req).to_string();
    let method = req.method().clone();
    match (&method, url.as_str()) {
        (&Method::POST, "/nodes") => Ok(register(&front, peer, req).await),
        (&Method::DELETE, path) if path.starts_with(NODES_PREFIX) => Ok(unregister(&front, path)),
        _ => Ok(text(StatusCode::NOT_FOUND, UNRECOGNIZED)),
    }
}

async fn register(front: &Front, peer: SocketAddr, req: Request<Incoming>) -> Response<ProxyBody> {
    let result = match req.into_body().collect().await {
        Ok(body) => Registration::from_json(&body.to_bytes())
            .and_then(|registration| front.registry.register(peer.ip(), registration)),
        Err(e) => Err(BalancerError::Validation(e.to_string())),
    };

    match result {
        Ok(added) => {
            let status = if added { StatusCode::CREATED } else { StatusCode::OK };
            json(status, front.register_body.clone())
        }
        Err(e) => {
            error!(peer = %peer.ip(), error = %e, "Failed to register");
            text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

fn unregister(front: &Front, url: &str) -> Response<ProxyBody> {
    let raw = &url[NODES_PREFIX.len()..];
    let raw = raw.split('?').next().unwrap_or_default();
    if let Ok(id) = NodeId::new(raw) {
        if !front.registry.unregister(&id) {
            debug!(id = %id, "Unregister for unknown node");
        }
    }
    json(StatusCode::OK, ACK_BODY)
}

/// Error message including every source, outermost first.
fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Resets and timeouts are expected while nodes come and go.
fn is_routine_disconnect(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            return matches!(
                io_err.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::TimedOut
            );
        }
        current = e.source();
    }
    false
}
