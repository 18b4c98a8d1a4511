//! Collapse identifier-bearing URL path segments into a placeholder so that
//! `/orders/482` and `/orders/901` share one resource name.

use url::{ParseError, Url};

/// Replacement for any segment that contains a digit.
pub const PLACEHOLDER: &str = "?";

/// Generalize the path component of `url`.
///
/// Accepts absolute URLs and bare paths. Query strings and fragments are
/// dropped; other segments are kept exactly as written, with no
/// percent-encoding or dot-segment removal. Never fails: empty or
/// unparseable input yields an empty string.
pub fn path_group(url: &str) -> String {
    let url = url.trim();
    if url.is_empty() {
        return String::new();
    }

    match raw_path(url) {
        Some(path) if path.starts_with('/') => generalize(path),
        Some(path) => generalize(&format!("/{path}")),
        None => {
            tracing::debug!(url, "path_group: unparseable url");
            String::new()
        }
    }
}

/// The path as it appears in `url`, without scheme, authority, query or
/// fragment. The parser only validates absolute input; the returned slice is
/// always taken from the original text.
fn raw_path(url: &str) -> Option<&str> {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    let before_query = &url[..end];

    match Url::parse(url) {
        Ok(parsed) if parsed.cannot_be_a_base() => None,
        Ok(_) => before_query
            .split_once("://")
            .map(|(_, rest)| strip_authority(rest)),
        Err(ParseError::RelativeUrlWithoutBase) => match before_query.strip_prefix("//") {
            Some(rest) => Some(strip_authority(rest)),
            None => Some(before_query),
        },
        Err(_) => None,
    }
}

fn strip_authority(rest: &str) -> &str {
    rest.find('/').map_or("/", |i| &rest[i..])
}

fn generalize(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if segment.chars().any(|c| c.is_ascii_digit()) {
                PLACEHOLDER
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}
