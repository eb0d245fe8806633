//! Static file server over HTTP/1.x.
//!
//! hyper owns the wire format and keep-alive; this module only answers
//! requests. Only `GET` is answered with content. Files are streamed in
//! fixed-size chunks; directories get a generated listing.

pub mod listing;
pub mod responder;
pub mod response;
pub mod sanitize;

pub use responder::FileResponder;

use std::convert::Infallible;
use std::sync::Arc;

use http_body_util::{BodyExt, Limited};
use hyper::body::{Body, Incoming};
use hyper::header::{HeaderValue, CONNECTION};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn, Instrument, Span};

use crate::runtime::ShutdownSignal;
use response::ResponseBody;

/// Largest buffered request head. Larger heads are answered with 431.
pub const MAX_HEAD_SIZE: usize = 16 * 1024;

/// Largest request body read and discarded before answering.
pub const MAX_DISCARD_BODY: usize = 256 * 1024;

/// Serve requests on `stream` until the peer closes, a response ends the
/// connection, or shutdown is triggered between requests.
pub async fn serve_connection<S>(
    stream: S,
    responder: Arc<FileResponder>,
    mut shutdown: ShutdownSignal,
    span: Span,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async move {
        let service = service_fn(move |request: Request<Incoming>| {
            let responder = Arc::clone(&responder);
            async move { Ok::<_, Infallible>(handle(&responder, request).await) }
        });

        let conn = http1::Builder::new()
            .keep_alive(true)
            .title_case_headers(true)
            .max_buf_size(MAX_HEAD_SIZE)
            .serve_connection(TokioIo::new(stream), service);
        tokio::pin!(conn);

        let mut shutting_down = false;
        loop {
            tokio::select! {
                result = conn.as_mut() => {
                    if let Err(e) = result {
                        debug!(error = %e, "Connection error");
                    }
                    break;
                }
                _ = shutdown.recv(), if !shutting_down => {
                    debug!("Shutdown, closing after the current response");
                    shutting_down = true;
                    conn.as_mut().graceful_shutdown();
                }
            }
        }
        debug!("Connection closed");
    }
    .instrument(span)
    .await
}

/// Discard the request body, then let the responder answer.
async fn handle(responder: &FileResponder, request: Request<Incoming>) -> Response<ResponseBody> {
    let (parts, body) = request.into_parts();
    info!(method = %parts.method, uri = %parts.uri, "Request");

    if body.size_hint().lower() > MAX_DISCARD_BODY as u64 {
        warn!(length = body.size_hint().lower(), "Request body too large");
        return bad_request();
    }
    if let Err(e) = Limited::new(body, MAX_DISCARD_BODY).collect().await {
        warn!(error = %e, "Failed to read request body");
        return bad_request();
    }

    responder.respond(&parts.method, &parts.uri).await
}

/// 400 that also ends the connection; the rest of the stream is unread.
fn bad_request() -> Response<ResponseBody> {
    let mut response = response::error(StatusCode::BAD_REQUEST);
    response
        .headers_mut()
        .insert(CONNECTION, HeaderValue::from_static("close"));
    response
}
