//! What to do when a request without a trailing slash resolves to a directory.

use std::borrow::Cow;

use bytes::Bytes;
use http::header::{
    CONTENT_LENGTH, CONTENT_SECURITY_POLICY, CONTENT_TYPE, LOCATION, X_CONTENT_TYPE_OPTIONS,
};
use http::{HeaderValue, Response, StatusCode, Uri};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

use crate::error::SendError;
use crate::send::SendStream;
use crate::serve_static::{body_from_bytes, ResponseBody};

// everything a URL may carry verbatim stays, `%` is handled separately so valid escapes survive
const URL_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'\\')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Reaction to the `directory` event, picked once per request.
#[derive(Debug, Clone)]
pub(crate) enum DirectoryListener {
    /// Redirect to the original URL with a trailing slash appended.
    Redirect { original: Uri },
    /// Report the directory as not found.
    NotFound,
}

impl DirectoryListener {
    pub(crate) fn select(redirect: bool, original: &Uri) -> Self {
        if redirect {
            DirectoryListener::Redirect {
                original: original.clone(),
            }
        } else {
            DirectoryListener::NotFound
        }
    }

    pub(crate) fn on_directory(
        &self,
        stream: &SendStream,
    ) -> Result<Response<ResponseBody>, SendError> {
        let original = match self {
            DirectoryListener::NotFound => return Err(stream.error(StatusCode::NOT_FOUND)),
            DirectoryListener::Redirect { original } => original,
        };

        // a directory path with a trailing slash should have been served by its index
        if stream.has_trailing_slash() {
            return Err(stream.error(StatusCode::NOT_FOUND));
        }

        let location = encode_url(&redirect_target(original));
        let header = HeaderValue::from_str(&location)
            .map_err(|_| stream.error(StatusCode::INTERNAL_SERVER_ERROR))?;
        let escaped = escape_html(&location);
        let doc = create_html_document(
            "Redirecting",
            &format!("Redirecting to <a href=\"{escaped}\">{escaped}</a>"),
        );

        tracing::debug!(location = %location, "redirecting directory request");

        Ok(redirect_response(header, doc))
    }
}

fn redirect_response(location: HeaderValue, doc: String) -> Response<ResponseBody> {
    let len = doc.len();
    let mut res = Response::new(body_from_bytes(Bytes::from(doc)));
    *res.status_mut() = StatusCode::MOVED_PERMANENTLY;

    let headers = res.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=UTF-8"),
    );
    headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
    headers.insert(
        CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'none'"),
    );
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(LOCATION, location);

    res
}

/// Original URL with `/` appended to its path, keeping the query.
fn redirect_target(original: &Uri) -> String {
    let path = format!("{}/", original.path());
    let path = collapse_leading_slashes(&path);

    let mut target = String::with_capacity(path.len() + 16);
    if let (Some(scheme), Some(authority)) = (original.scheme_str(), original.authority()) {
        target.push_str(scheme);
        target.push_str("://");
        target.push_str(authority.as_str());
    }
    target.push_str(&path);
    if let Some(query) = original.query() {
        target.push('?');
        target.push_str(query);
    }

    target
}

/// Collapse a run of leading slashes into a single one.
///
/// `//evil.example/` would otherwise be read as a protocol relative URL.
pub(crate) fn collapse_leading_slashes(s: &str) -> Cow<'_, str> {
    let trimmed = s.trim_start_matches('/');
    if s.len() - trimmed.len() > 1 {
        Cow::Owned(format!("/{trimmed}"))
    } else {
        Cow::Borrowed(s)
    }
}

/// Percent-encode characters that can't appear in a URL, leaving existing escapes alone.
pub(crate) fn encode_url(url: &str) -> String {
    let mut out = String::with_capacity(url.len());
    let mut rest = url;

    while let Some(idx) = rest.find('%') {
        let (head, tail) = rest.split_at(idx);
        out.extend(utf8_percent_encode(head, URL_ENCODE_SET));

        let bytes = tail.as_bytes();
        if bytes.len() >= 3 && bytes[1].is_ascii_hexdigit() && bytes[2].is_ascii_hexdigit() {
            out.push_str(&tail[..3]);
            rest = &tail[3..];
        } else {
            out.push_str("%25");
            rest = &tail[1..];
        }
    }
    out.extend(utf8_percent_encode(rest, URL_ENCODE_SET));

    out
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn create_html_document(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n\
         <html lang=\"en\">\n\
         <head>\n\
         <meta charset=\"utf-8\">\n\
         <title>{title}</title>\n\
         </head>\n\
         <body>\n\
         <pre>{body}</pre>\n\
         </body>\n\
         </html>\n"
    )
}
