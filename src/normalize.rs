//! Route template normalization
//!
//! Collapses variable path segments into placeholders so raw request paths
//! never leak into metric labels: `/users/42` and `/users/7` both become
//! `/users/{id}`, keeping label cardinality bounded no matter what clients
//! send.
//!
//! Rules, applied per segment:
//! - all-numeric            -> `{id}`
//! - UUID (8-4-4-4-12 hex)  -> `{uuid}`
//! - 16+ hex characters     -> `{hash}`
//! - final segment with a file extension -> `{file}`
//! - anything longer than [`MAX_SEGMENT_LEN`] bytes -> `{param}`
//!
//! The over-length rule is the cardinality cap for malformed or opaque
//! parameter values that match none of the shape rules. Placeholders never
//! re-match any rule, so normalization is idempotent.

use once_cell::sync::Lazy;
use regex::Regex;

/// Segments longer than this are collapsed to `{param}` regardless of shape.
pub const MAX_SEGMENT_LEN: usize = 64;

static NUMERIC_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+$").unwrap());

static UUID_SEGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$").unwrap()
});

static HEX_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?i)[0-9a-f]{16,}$").unwrap());

static FILE_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^/]+\.[A-Za-z0-9]+$").unwrap());

/// Collapse the variable segments of a request path into a route template.
///
/// Paths that do not start with `/` are returned unchanged; label validation
/// downstream treats them as malformed.
pub fn normalize_route(path: &str) -> String {
    if !path.starts_with('/') {
        return path.to_string();
    }

    let segment_count = path.split('/').count();
    let mut out = String::with_capacity(path.len());
    for (i, segment) in path.split('/').enumerate() {
        if i > 0 {
            out.push('/');
        }
        if segment.is_empty() {
            continue;
        }
        let is_last = i + 1 == segment_count;
        out.push_str(normalize_segment(segment, is_last));
    }
    out
}

fn normalize_segment(segment: &str, is_last: bool) -> &str {
    if NUMERIC_SEGMENT.is_match(segment) {
        "{id}"
    } else if UUID_SEGMENT.is_match(segment) {
        "{uuid}"
    } else if HEX_SEGMENT.is_match(segment) {
        "{hash}"
    } else if is_last && FILE_SEGMENT.is_match(segment) {
        "{file}"
    } else if segment.len() > MAX_SEGMENT_LEN {
        "{param}"
    } else {
        segment
    }
}
