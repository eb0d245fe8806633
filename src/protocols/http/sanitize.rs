//! Request URI to filesystem path mapping.
//!
//! A path is only produced when the decoded URI:
//! - starts with the configured prefix and with `/`
//! - has no segment starting or ending with `.` (this covers `..`, hidden
//!   names and `foo.`)
//! - contains none of `<`, `>`, `&`, `"` or NUL

use std::path::{Path, PathBuf};

use percent_encoding::percent_decode_str;

const INSECURE_CHARS: &[char] = &['<', '>', '&', '"', '\0'];

/// Percent-decode a URI path, treating `+` as a space.
///
/// Decoded bytes that are not UTF-8 are read as Latin-1.
pub fn decode_uri(uri: &str) -> String {
    let plus_decoded = uri.replace('+', " ");
    let decoded = percent_decode_str(&plus_decoded);
    match decoded.clone().decode_utf8() {
        Ok(s) => s.into_owned(),
        Err(_) => decoded.map(char::from).collect(),
    }
}

/// Map `uri` onto `root`, or `None` when it is not safe to serve.
pub fn sanitize_uri(uri: &str, prefix: &str, root: &Path) -> Option<PathBuf> {
    let path = strip_query(uri);
    let decoded = decode_uri(path);

    if !decoded.starts_with(prefix) || !decoded.starts_with('/') {
        return None;
    }

    if decoded.contains("/.")
        || decoded.contains("./")
        || decoded.starts_with('.')
        || decoded.ends_with('.')
        || decoded.contains(INSECURE_CHARS)
    {
        return None;
    }

    Some(root.join(decoded.trim_start_matches('/')))
}

fn strip_query(uri: &str) -> &str {
    let end = uri.find(['?', '#']).unwrap_or(uri.len());
    &uri[..end]
}
