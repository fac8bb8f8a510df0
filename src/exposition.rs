//! Exposition endpoint
//!
//! Minimal hyper HTTP/1 server rendering the registry on demand at the
//! configured path. Each scrape calls [`MetricRegistry::render`] fresh; there
//! is no caching beyond the registry's own snapshot discipline.

use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::Result;
use crate::registry::MetricRegistry;

/// Serve the exposition endpoint until the task is cancelled.
pub async fn serve(registry: Arc<MetricRegistry>, addr: SocketAddr, path: String) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("metrics endpoint listening on http://{}{}", listener.local_addr()?, path);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let registry = Arc::clone(&registry);
        let path = path.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let response = respond(&req, &registry, &path);
                async move { Ok::<_, std::convert::Infallible>(response) }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("metrics endpoint connection error: {}", e);
            }
        });
    }
}

/// Build the response for one scrape request.
///
/// Generic over the body type; the handler only inspects the request line.
fn respond<B>(req: &Request<B>, registry: &MetricRegistry, path: &str) -> Response<Full<Bytes>> {
    if req.uri().path() != path {
        return plain(StatusCode::NOT_FOUND, "not found");
    }
    if req.method() != Method::GET {
        return plain(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
    }

    let body = registry.render();
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", registry.format_type())
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| plain(StatusCode::INTERNAL_SERVER_ERROR, "encoding failed"))
}

fn plain(status: StatusCode, message: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(message)));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetricsConfig;
    use crate::registry::StatusClass;

    fn registry() -> Arc<MetricRegistry> {
        Arc::new(
            MetricRegistry::new(&MetricsConfig {
                port: None,
                ..Default::default()
            })
            .unwrap(),
        )
    }

    fn get(path: &str) -> Request<()> {
        Request::builder().method(Method::GET).uri(path).body(()).unwrap()
    }

    #[test]
    fn test_scrape_path_returns_exposition_text() {
        let reg = registry();
        reg.increment_count("GET", "/users/{id}", StatusClass::Success);

        let response = respond(&get("/metrics"), &reg, "/metrics");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["Content-Type"],
            "text/plain; version=0.0.4"
        );
    }

    #[test]
    fn test_unknown_path_is_404() {
        let response = respond(&get("/other"), &registry(), "/metrics");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_non_get_is_405() {
        let req = Request::builder()
            .method(Method::POST)
            .uri("/metrics")
            .body(())
            .unwrap();
        let response = respond(&req, &registry(), "/metrics");
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[test]
    fn test_custom_path_is_honored() {
        let reg = registry();
        assert_eq!(
            respond(&get("/internal/metrics"), &reg, "/internal/metrics").status(),
            StatusCode::OK
        );
        assert_eq!(
            respond(&get("/metrics"), &reg, "/internal/metrics").status(),
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_serve_binds_ephemeral_port() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let handle = tokio::spawn(serve(registry(), addr, "/metrics".to_string()));

        // Give the listener a moment, then cancel; binding twice on :0 never
        // collides, so reaching this point without error is the assertion.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!handle.is_finished());
        handle.abort();
    }
}
