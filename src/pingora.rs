// src/pingora.rs

//! Running the gate inside a Pingora `ProxyHttp::request_filter`.

use crate::gate::{Gate, IncomingRequest};
use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_LENGTH};
use pingora_core::Result;
use pingora_http::ResponseHeader;
use pingora_proxy::Session;
use tracing::debug;

/// Builds the gate's view of a proxied request.
///
/// Proxied request URIs rarely carry a scheme, so it is derived from the
/// downstream connection: `https` if it was TLS, `http` otherwise.
pub fn incoming_request(session: &Session) -> IncomingRequest {
    let header = session.req_header();
    let authorization = header
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let request = IncomingRequest::new(authorization, header.uri.clone());
    if request.scheme().is_some() {
        return request;
    }
    let tls = session.digest().is_some_and(|digest| digest.ssl_digest.is_some());
    request.with_scheme(if tls { "https" } else { "http" })
}

/// Authorizes the session's request and, when the gate produced a response
/// (a 401, or the `HTTPS is required` 403), writes it downstream.
///
/// Returns `Ok(true)` when the response was written and the request must not
/// be proxied, which is what `request_filter` expects.
pub async fn filter_request(gate: &Gate, session: &mut Session) -> Result<bool> {
    let request = incoming_request(session);
    let decision = gate.authorize(&request).await;

    let Some(response) = decision.rejection_response() else {
        return Ok(false);
    };
    debug!(status = %response.status(), "Answering request at the gate");

    let (parts, body) = response.into_parts();
    let mut header = ResponseHeader::build(parts.status, Some(parts.headers.len() + 1))?;
    for (name, value) in parts.headers.iter() {
        header.insert_header(name.clone(), value.clone())?;
    }
    header.insert_header(CONTENT_LENGTH, body.len().to_string())?;

    session.write_response_header(Box::new(header), body.is_empty()).await?;
    if !body.is_empty() {
        session.write_response_body(Some(Bytes::from(body)), true).await?;
    }
    Ok(true)
}
