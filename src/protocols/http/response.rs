//! Canned responses and the body type every response carries.

use std::convert::Infallible;

use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full};
use hyper::header::{HeaderValue, ALLOW, CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use hyper::{Response, StatusCode};

/// In-memory pages and streamed files share one body type.
pub type ResponseBody = UnsyncBoxBody<Bytes, std::io::Error>;

fn full(body: impl Into<Bytes>) -> ResponseBody {
    Full::new(body.into())
        .map_err(|never: Infallible| match never {})
        .boxed_unsync()
}

fn with_body(
    status: StatusCode,
    content_type: Option<&'static str>,
    body: Bytes,
) -> Response<ResponseBody> {
    let len = body.len() as u64;
    let mut response = Response::new(full(body));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
    if let Some(content_type) = content_type {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    }
    response
}

/// Plain-text failure page: `Failure: 404 Not Found`.
pub fn error(status: StatusCode) -> Response<ResponseBody> {
    let body = format!("Failure: {status}\r\n");
    let mut response = with_body(status, Some("text/plain; charset=UTF-8"), body.into());
    if status == StatusCode::METHOD_NOT_ALLOWED {
        response
            .headers_mut()
            .insert(ALLOW, HeaderValue::from_static("GET"));
    }
    response
}

pub fn redirect(location: HeaderValue) -> Response<ResponseBody> {
    let mut response = with_body(StatusCode::FOUND, None, Bytes::new());
    response.headers_mut().insert(LOCATION, location);
    response
}

pub fn html(body: String) -> Response<ResponseBody> {
    with_body(StatusCode::OK, Some("text/html; charset=UTF-8"), body.into())
}
