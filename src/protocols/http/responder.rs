//! File responder: turns one request into one response.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures_util::StreamExt;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use hyper::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::{Method, Response, StatusCode, Uri};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use super::listing;
use super::response::{self, ResponseBody};
use super::sanitize::sanitize_uri;
use crate::error::RequestError;

/// What a request resolved to, before any body is produced.
#[derive(Debug, PartialEq, Eq)]
pub enum Target {
    Listing { dir: PathBuf },
    Redirect { location: String },
    File { path: PathBuf },
}

/// Serves files and listings below `root` for URIs under `prefix`.
#[derive(Debug, Clone)]
pub struct FileResponder {
    prefix: String,
    root: PathBuf,
    chunk_size: usize,
}

impl FileResponder {
    pub fn new(prefix: impl Into<String>, root: impl Into<PathBuf>, chunk_size: usize) -> Self {
        Self {
            prefix: prefix.into(),
            root: root.into(),
            chunk_size: chunk_size.max(1),
        }
    }

    /// Method check, sanitization and filesystem lookup.
    ///
    /// `path` is the request path as sent, still percent-encoded.
    pub async fn resolve(&self, method: &Method, path: &str) -> Result<Target, RequestError> {
        if *method != Method::GET {
            return Err(RequestError::MethodNotAllowed(method.to_string()));
        }

        let fs_path =
            sanitize_uri(path, &self.prefix, &self.root).ok_or(RequestError::Forbidden)?;

        if listing::is_hidden(&fs_path) {
            return Err(RequestError::NotFound);
        }

        let metadata = tokio::fs::metadata(&fs_path)
            .await
            .map_err(|_| RequestError::NotFound)?;

        if metadata.is_dir() {
            if path.ends_with('/') {
                Ok(Target::Listing { dir: fs_path })
            } else {
                Ok(Target::Redirect {
                    location: format!("{path}/"),
                })
            }
        } else if metadata.is_file() {
            Ok(Target::File { path: fs_path })
        } else {
            Err(RequestError::NotFound)
        }
    }

    /// Answer a request. Request errors become status responses.
    pub async fn respond(&self, method: &Method, uri: &Uri) -> Response<ResponseBody> {
        let path = uri.path();

        let target = match self.resolve(method, path).await {
            Ok(target) => target,
            Err(e) => {
                debug!(uri = %uri, error = %e, "Request rejected");
                return response::error(e.status());
            }
        };

        match target {
            Target::Redirect { location } => match HeaderValue::from_str(&location) {
                Ok(location) => response::redirect(location),
                Err(_) => response::error(StatusCode::BAD_REQUEST),
            },
            Target::Listing { dir } => match listing::visible_entries(&dir).await {
                Ok(names) => response::html(listing::render(path, &names)),
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "Failed to list directory");
                    response::error(RequestError::Internal(e.to_string()).status())
                }
            },
            Target::File { path } => self.send_file(path).await,
        }
    }

    async fn send_file(&self, path: PathBuf) -> Response<ResponseBody> {
        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Open failed");
                return response::error(StatusCode::NOT_FOUND);
            }
        };
        let total = match file.metadata().await {
            Ok(metadata) => metadata.len(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to stat open file");
                return response::error(StatusCode::INTERNAL_SERVER_ERROR);
            }
        };
        let content_type = content_type(&path);

        if total == 0 {
            info!(path = %path.display(), bytes = 0, "Transfer complete");
        }
        let body = stream_body(file, total, self.chunk_size, move |sent, total| {
            if sent == total {
                info!(path = %path.display(), bytes = total, "Transfer complete");
            } else {
                debug!(progress = sent, total, "Transfer progress");
            }
        });

        let mut response = Response::new(body);
        let headers = response.headers_mut();
        headers.insert(CONTENT_LENGTH, HeaderValue::from(total));
        headers.insert(CONTENT_TYPE, content_type);
        response
    }
}

/// Content-Type guessed from the file extension.
pub fn content_type(path: &Path) -> HeaderValue {
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    HeaderValue::from_str(mime.as_ref())
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"))
}

/// Body that yields up to `total` bytes of `reader` in frames of at most
/// `chunk_size` bytes.
///
/// The next chunk is read only once the connection has taken the previous
/// frame. `on_progress(sent, total)` runs for every frame. A reader that ends
/// early ends the body early; the declared length then no longer matches and
/// the connection is aborted.
pub fn stream_body<R, F>(reader: R, total: u64, chunk_size: usize, mut on_progress: F) -> ResponseBody
where
    R: AsyncRead + Send + 'static,
    F: FnMut(u64, u64) + Send + 'static,
{
    let mut sent = 0u64;
    let frames = ReaderStream::with_capacity(reader.take(total), chunk_size).map(
        move |chunk: std::io::Result<Bytes>| -> std::io::Result<Frame<Bytes>> {
            let chunk = chunk?;
            sent += chunk.len() as u64;
            on_progress(sent, total);
            Ok(Frame::data(chunk))
        },
    );
    StreamBody::new(frames).boxed_unsync()
}
