//! Conditional request evaluation against the headers a file response is about to carry.

use std::fs::Metadata;
use std::time::{SystemTime, UNIX_EPOCH};

use http::header::{
    HeaderName, CACHE_CONTROL, ETAG, IF_MATCH, IF_MODIFIED_SINCE, IF_NONE_MATCH, IF_RANGE,
    IF_UNMODIFIED_SINCE, LAST_MODIFIED,
};
use http::HeaderMap;

/// Weak validator built from the file size and modification time in milliseconds.
pub(crate) fn etag(stat: &Metadata) -> String {
    let mtime = stat
        .modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |since| since.as_millis());

    format!("W/\"{:x}-{:x}\"", stat.len(), mtime)
}

pub(crate) fn is_conditional_get(req: &HeaderMap) -> bool {
    [IF_MATCH, IF_UNMODIFIED_SINCE, IF_NONE_MATCH, IF_MODIFIED_SINCE]
        .iter()
        .any(|name| req.contains_key(name))
}

pub(crate) fn is_precondition_failure(req: &HeaderMap, res: &HeaderMap) -> bool {
    if let Some(matches) = header_str(req, &IF_MATCH) {
        return match header_str(res, &ETAG) {
            None => true,
            Some(etag) => {
                matches.trim() != "*" && parse_token_list(matches).all(|m| !etag_eq(m, etag))
            }
        };
    }

    if let Some(since) = header_date(req, &IF_UNMODIFIED_SINCE) {
        return header_date(res, &LAST_MODIFIED).map_or(true, |modified| modified > since);
    }

    false
}

/// Whether the client's cached copy is still good, in which case a `304` is sent.
pub(crate) fn is_fresh(req: &HeaderMap, res: &HeaderMap) -> bool {
    let modified_since = header_str(req, &IF_MODIFIED_SINCE);
    let none_match = header_str(req, &IF_NONE_MATCH);
    if modified_since.is_none() && none_match.is_none() {
        return false;
    }

    if header_str(req, &CACHE_CONTROL)
        .is_some_and(|value| parse_token_list(value).any(|token| token == "no-cache"))
    {
        return false;
    }

    if let Some(none_match) = none_match.filter(|value| value.trim() != "*") {
        let Some(etag) = header_str(res, &ETAG) else {
            return false;
        };
        if !parse_token_list(none_match).any(|m| etag_eq(m, etag)) {
            return false;
        }
    }

    if let Some(since) = modified_since {
        let stale = match (header_date(res, &LAST_MODIFIED), parse_date(since)) {
            (Some(modified), Some(since)) => modified > since,
            _ => true,
        };
        if stale {
            return false;
        }
    }

    true
}

/// `If-Range` allows the range when it still names the current representation.
pub(crate) fn is_range_fresh(req: &HeaderMap, res: &HeaderMap) -> bool {
    let Some(if_range) = header_str(req, &IF_RANGE) else {
        return true;
    };

    if if_range.contains('"') {
        return header_str(res, &ETAG).is_some_and(|etag| if_range.contains(etag));
    }

    match (header_date(res, &LAST_MODIFIED), parse_date(if_range)) {
        (Some(modified), Some(if_range)) => modified <= if_range,
        _ => false,
    }
}

// weak comparison
fn etag_eq(candidate: &str, etag: &str) -> bool {
    candidate == etag
        || candidate.strip_prefix("W/") == Some(etag)
        || etag.strip_prefix("W/") == Some(candidate)
}

fn parse_token_list(value: &str) -> impl Iterator<Item = &str> {
    value
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn header_date(headers: &HeaderMap, name: &HeaderName) -> Option<SystemTime> {
    header_str(headers, name).and_then(parse_date)
}

fn parse_date(value: &str) -> Option<SystemTime> {
    httpdate::parse_http_date(value).ok()
}
