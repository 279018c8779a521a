//! ACME problem documents (spec §4.7, §7): the error vocabulary every
//! handler maps failures onto before they leave the process.

use bytes::Bytes;
use http::{HeaderValue, Response, StatusCode};
use http_body_util::Full;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProblemType {
    BadNonce,
    BadCsr,
    Malformed,
    Unauthorized,
    RateLimited,
    RejectedIdentifier,
    ServerInternal,
}

impl ProblemType {
    pub fn urn(&self) -> &'static str {
        match self {
            ProblemType::BadNonce => "urn:ietf:params:acme:error:badNonce",
            ProblemType::BadCsr => "urn:ietf:params:acme:error:badCSR",
            ProblemType::Malformed => "urn:ietf:params:acme:error:malformed",
            ProblemType::Unauthorized => "urn:ietf:params:acme:error:unauthorized",
            ProblemType::RateLimited => "urn:ietf:params:acme:error:rateLimited",
            ProblemType::RejectedIdentifier => "urn:ietf:params:acme:error:rejectedIdentifier",
            ProblemType::ServerInternal => "urn:ietf:params:acme:error:serverInternal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ProblemType::BadNonce => StatusCode::BAD_REQUEST,
            ProblemType::BadCsr => StatusCode::BAD_REQUEST,
            ProblemType::Malformed => StatusCode::BAD_REQUEST,
            ProblemType::Unauthorized => StatusCode::FORBIDDEN,
            ProblemType::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ProblemType::RejectedIdentifier => StatusCode::FORBIDDEN,
            ProblemType::ServerInternal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Problem {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub detail: String,
    pub status: u16,
}

impl Problem {
    pub fn new(kind: ProblemType, detail: impl Into<String>) -> Self {
        Problem {
            kind: kind.urn(),
            detail: detail.into(),
            status: kind.status().as_u16(),
        }
    }

    pub fn into_response(self) -> Response<Full<Bytes>> {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = serde_json::to_vec(&self).unwrap_or_else(|_| b"{}".to_vec());
        let mut resp = Response::new(Full::new(Bytes::from(body)));
        *resp.status_mut() = status;
        resp.headers_mut().insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        resp
    }
}

pub fn problem_response(kind: ProblemType, detail: impl Into<String>) -> Response<Full<Bytes>> {
    Problem::new(kind, detail).into_response()
}
