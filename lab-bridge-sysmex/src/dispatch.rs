//! Routing of assembled ASTM messages to their LAB transaction.

use regex::Regex;
use std::sync::LazyLock;

static QUERY_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-7]?Q\|").expect("valid query regex"));
static HEADER_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-7]?H\|").expect("valid header regex"));

/// Transaction a received ASTM message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Worklist query: at least one `Q|` record.
    Lab27,
    /// Result upload: no query record, but an `H|` header.
    Lab29,
    /// Neither; the message is dropped.
    Ignore,
}

/// Classify a raw ASTM message. A query record anywhere wins over the
/// header; the optional single-digit record-number prefix is tolerated.
pub fn classify(message: &str) -> Route {
    let lines: Vec<&str> = message
        .split(['\r', '\n'])
        .filter(|l| !l.is_empty())
        .collect();

    if lines.iter().any(|l| QUERY_LINE.is_match(l)) {
        Route::Lab27
    } else if lines.iter().any(|l| HEADER_LINE.is_match(l)) {
        Route::Lab29
    } else {
        Route::Ignore
    }
}
