//! Admin HTTP surface (component C5, spec §4.5): read-only CA material
//! endpoints mounted by the host under `/pki/`. Built on raw `hyper`
//! request/response types the same way the pack's admin surfaces are, rather
//! than pulling in a routing framework for two GET routes.

use crate::app::PkiApp;
use crate::crypto::pem_encode_chain;
use bytes::Bytes;
use http::{HeaderValue, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

pub type BoxBody = Full<Bytes>;

#[derive(Serialize)]
struct CaResponse {
    id: String,
    name: String,
    root_common_name: String,
    intermediate_common_name: String,
    root_certificate: String,
    intermediate_certificate: String,
}

fn json_response(status: StatusCode, body: impl Serialize) -> Response<BoxBody> {
    let bytes = serde_json::to_vec(&body).unwrap_or_else(|_| b"{}".to_vec());
    let mut resp = Response::new(Full::new(Bytes::from(bytes)));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        http::header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    resp
}

fn empty_response(status: StatusCode) -> Response<BoxBody> {
    let mut resp = Response::new(Full::new(Bytes::new()));
    *resp.status_mut() = status;
    resp
}

fn pem_response(status: StatusCode, body: String) -> Response<BoxBody> {
    let mut resp = Response::new(Full::new(Bytes::from(body.into_bytes())));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        http::header::CONTENT_TYPE,
        HeaderValue::from_static("application/pem-certificate-chain"),
    );
    resp
}

/// Route one request under the `/pki/` prefix (spec §4.5). `path` is the
/// request path with the mount prefix already stripped by the host.
pub async fn handle(app: &Arc<PkiApp>, req: Request<Incoming>) -> Response<BoxBody> {
    if req.method() != http::Method::GET {
        return empty_response(StatusCode::METHOD_NOT_ALLOWED);
    }

    let path = req.uri().path().trim_start_matches('/');
    let mut segments = path.split('/');

    match (segments.next(), segments.next(), segments.next(), segments.next()) {
        (Some("ca"), Some(id), None, None) => handle_get_ca(app, id).await,
        (Some("ca"), Some(id), Some("certificates"), None) => {
            handle_get_certificates(app, id).await
        }
        _ => empty_response(StatusCode::NOT_FOUND),
    }
}

async fn load_ca(app: &Arc<PkiApp>, id: &str) -> Option<Arc<crate::ca::Ca>> {
    match app.ca_or_provision_default(id).await {
        Ok(ca) => ca,
        Err(e) => {
            warn!(id, error = %e, "failed to provision CA on demand");
            None
        }
    }
}

async fn handle_get_ca(app: &Arc<PkiApp>, id: &str) -> Response<BoxBody> {
    let Some(ca) = load_ca(app, id).await else {
        return empty_response(StatusCode::NOT_FOUND);
    };
    let root = ca.root_certificate().await;
    let intermediate = ca.intermediate_certificate().await;
    json_response(
        StatusCode::OK,
        CaResponse {
            id: ca.id().to_string(),
            name: ca.display_name(),
            root_common_name: ca.root_common_name(),
            intermediate_common_name: ca.intermediate_common_name(),
            root_certificate: root.pem,
            intermediate_certificate: intermediate.pem,
        },
    )
}

async fn handle_get_certificates(app: &Arc<PkiApp>, id: &str) -> Response<BoxBody> {
    let Some(ca) = load_ca(app, id).await else {
        return empty_response(StatusCode::NOT_FOUND);
    };
    let root = ca.root_certificate().await;
    let intermediate = ca.intermediate_certificate().await;
    let chain = pem_encode_chain([intermediate.der.as_slice(), root.der.as_slice()]);
    pem_response(StatusCode::OK, chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PkiConfig;
    use crate::storage::memory::MemoryStorage;

    // `handle()` itself takes a `Request<Incoming>`, which only hyper's
    // server loop can construct; these tests exercise the per-route handler
    // bodies directly instead, since routing is a single flat match.

    async fn test_app() -> Arc<PkiApp> {
        let storage: Arc<dyn crate::storage::Storage> = Arc::new(MemoryStorage::new());
        PkiApp::provision(storage, PkiConfig::default()).await.unwrap()
    }

    #[tokio::test]
    async fn get_ca_local_lazily_provisions_default() {
        let app = test_app().await;
        let resp = handle_get_ca(&app, "local").await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_ca_id_is_not_found() {
        let app = test_app().await;
        let resp = handle_get_ca(&app, "nonexistent").await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn certificates_endpoint_returns_pem_chain_content_type() {
        let app = test_app().await;
        let resp = handle_get_certificates(&app, "local").await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(http::header::CONTENT_TYPE).unwrap(),
            "application/pem-certificate-chain"
        );
    }

}
