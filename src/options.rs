use std::fmt;
use std::fs::Metadata;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use http::HeaderMap;

const SECOND: f64 = 1000.0;
const MINUTE: f64 = SECOND * 60.0;
const HOUR: f64 = MINUTE * 60.0;
const DAY: f64 = HOUR * 24.0;
const WEEK: f64 = DAY * 7.0;
const YEAR: f64 = DAY * 365.25;

// one year, in milliseconds
const MAX_MAX_AGE: f64 = 60.0 * 60.0 * 24.0 * 365.0 * 1000.0;

/// How to treat files and directories whose name starts with a dot.
///
/// Left unset, only a dotfile in the last path segment is ignored, so `/.well-known/x.txt`
/// is served while `/.env` is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dotfiles {
    /// Serve them like any other file.
    Allow,
    /// Respond with `403 Forbidden`.
    Deny,
    /// Pretend they don't exist and respond with `404 Not Found`.
    Ignore,
}

/// Index file names tried, in order, when a directory is requested with a trailing slash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Index {
    Disabled,
    Files(Vec<String>),
}

impl Index {
    pub(crate) fn files(&self) -> &[String] {
        match self {
            Index::Disabled => &[],
            Index::Files(files) => files,
        }
    }
}

impl Default for Index {
    fn default() -> Self {
        Index::Files(vec!["index.html".to_owned()])
    }
}

/// `false` disables index files, `true` keeps the default `index.html`.
impl From<bool> for Index {
    fn from(value: bool) -> Self {
        if value {
            Index::default()
        } else {
            Index::Disabled
        }
    }
}

impl From<&str> for Index {
    fn from(value: &str) -> Self {
        Index::Files(vec![value.to_owned()])
    }
}

impl From<String> for Index {
    fn from(value: String) -> Self {
        Index::Files(vec![value])
    }
}

impl From<Vec<String>> for Index {
    fn from(value: Vec<String>) -> Self {
        Index::Files(value)
    }
}

impl From<Vec<&str>> for Index {
    fn from(value: Vec<&str>) -> Self {
        Index::Files(value.into_iter().map(str::to_owned).collect())
    }
}

/// File extensions appended to an extension-less path that was not found.
///
/// With `Fallback(vec!["html"])` a request for `/about` is answered with `about.html`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Extensions {
    #[default]
    Disabled,
    Fallback(Vec<String>),
}

impl Extensions {
    pub(crate) fn list(&self) -> &[String] {
        match self {
            Extensions::Disabled => &[],
            Extensions::Fallback(list) => list,
        }
    }
}

impl From<Vec<String>> for Extensions {
    fn from(value: Vec<String>) -> Self {
        Extensions::Fallback(value)
    }
}

impl From<Vec<&str>> for Extensions {
    fn from(value: Vec<&str>) -> Self {
        Extensions::Fallback(value.into_iter().map(str::to_owned).collect())
    }
}

/// The `max-age` advertised in `Cache-Control`.
///
/// Either plain milliseconds or a duration string like `"1d"`, `"2 hours"` or `"500ms"`.
/// Unparsable strings resolve to zero, and the value is clamped to one year.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaxAge {
    Millis(u64),
    Text(String),
}

impl MaxAge {
    pub fn as_duration(&self) -> Duration {
        let millis = match self {
            MaxAge::Millis(millis) => *millis as f64,
            MaxAge::Text(text) => parse_millis(text).unwrap_or(0.0),
        };

        Duration::from_millis(millis.clamp(0.0, MAX_MAX_AGE) as u64)
    }
}

impl Default for MaxAge {
    fn default() -> Self {
        MaxAge::Millis(0)
    }
}

impl From<u64> for MaxAge {
    fn from(value: u64) -> Self {
        MaxAge::Millis(value)
    }
}

impl From<Duration> for MaxAge {
    fn from(value: Duration) -> Self {
        MaxAge::Millis(value.as_millis().try_into().unwrap_or(u64::MAX))
    }
}

impl From<&str> for MaxAge {
    fn from(value: &str) -> Self {
        MaxAge::Text(value.to_owned())
    }
}

impl From<String> for MaxAge {
    fn from(value: String) -> Self {
        MaxAge::Text(value)
    }
}

fn parse_millis(text: &str) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() || text.len() > 100 {
        return None;
    }

    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-'))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let value = number.parse::<f64>().ok()?;

    let factor = match unit.trim_start().to_ascii_lowercase().as_str() {
        "" | "ms" | "msec" | "msecs" | "millisecond" | "milliseconds" => 1.0,
        "s" | "sec" | "secs" | "second" | "seconds" => SECOND,
        "m" | "min" | "mins" | "minute" | "minutes" => MINUTE,
        "h" | "hr" | "hrs" | "hour" | "hours" => HOUR,
        "d" | "day" | "days" => DAY,
        "w" | "week" | "weeks" => WEEK,
        "y" | "yr" | "yrs" | "year" | "years" => YEAR,
        _ => return None,
    };

    Some(value * factor)
}

/// Hook called with the response headers right before a file is sent.
///
/// Headers inserted here win over the ones the service would set itself.
#[derive(Clone)]
pub struct SetHeaders(Arc<dyn Fn(&mut HeaderMap, &Path, &Metadata) + Send + Sync>);

impl SetHeaders {
    pub fn new<F>(hook: F) -> Self
    where
        F: Fn(&mut HeaderMap, &Path, &Metadata) + Send + Sync + 'static,
    {
        Self(Arc::new(hook))
    }

    pub(crate) fn call(&self, headers: &mut HeaderMap, path: &Path, stat: &Metadata) {
        (self.0)(headers, path, stat)
    }
}

impl fmt::Debug for SetHeaders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SetHeaders").finish_non_exhaustive()
    }
}

/// Caller supplied options. Every field left as `None` keeps its default.
#[derive(Debug, Clone, Default)]
pub struct ServeStaticOptions {
    pub accept_ranges: Option<bool>,
    pub cache_control: Option<bool>,
    pub dotfiles: Option<Dotfiles>,
    pub etag: Option<bool>,
    pub extensions: Option<Extensions>,
    pub fallthrough: Option<bool>,
    pub immutable: Option<bool>,
    pub index: Option<Index>,
    pub last_modified: Option<bool>,
    pub max_age: Option<MaxAge>,
    pub redirect: Option<bool>,
    pub set_headers: Option<SetHeaders>,
}

impl ServeStaticOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advertise and honor byte range requests. Defaults to `true`.
    pub fn accept_ranges(mut self, accept: bool) -> Self {
        self.accept_ranges = Some(accept);
        self
    }

    /// Emit a `Cache-Control` header. Defaults to `true`.
    pub fn cache_control(mut self, enabled: bool) -> Self {
        self.cache_control = Some(enabled);
        self
    }

    /// Policy for path segments starting with a dot, applied to every segment.
    pub fn dotfiles(mut self, dotfiles: Dotfiles) -> Self {
        self.dotfiles = Some(dotfiles);
        self
    }

    /// Emit a weak `ETag` and evaluate `If-None-Match`/`If-Match`. Defaults to `true`.
    pub fn etag(mut self, enabled: bool) -> Self {
        self.etag = Some(enabled);
        self
    }

    pub fn extensions(mut self, extensions: impl Into<Extensions>) -> Self {
        self.extensions = Some(extensions.into());
        self
    }

    /// Hand client errors (like a missing file) to the next service instead of failing.
    ///
    /// Also decides whether methods other than `GET` and `HEAD` are passed on or answered with
    /// `405 Method Not Allowed`. Defaults to `true`.
    pub fn fallthrough(mut self, fallthrough: bool) -> Self {
        self.fallthrough = Some(fallthrough);
        self
    }

    /// Add `immutable` to `Cache-Control`. Defaults to `false`.
    pub fn immutable(mut self, immutable: bool) -> Self {
        self.immutable = Some(immutable);
        self
    }

    pub fn index(mut self, index: impl Into<Index>) -> Self {
        self.index = Some(index.into());
        self
    }

    /// Emit `Last-Modified` and evaluate `If-Modified-Since`. Defaults to `true`.
    pub fn last_modified(mut self, enabled: bool) -> Self {
        self.last_modified = Some(enabled);
        self
    }

    pub fn max_age(mut self, max_age: impl Into<MaxAge>) -> Self {
        self.max_age = Some(max_age.into());
        self
    }

    /// Redirect directory requests missing a trailing slash to the canonical URL.
    ///
    /// When disabled such requests are treated as not found. Defaults to `true`.
    pub fn redirect(mut self, redirect: bool) -> Self {
        self.redirect = Some(redirect);
        self
    }

    pub fn set_headers<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut HeaderMap, &Path, &Metadata) + Send + Sync + 'static,
    {
        self.set_headers = Some(SetHeaders::new(hook));
        self
    }
}

/// Fully resolved configuration, shared read-only by every request.
#[derive(Debug, Clone)]
pub struct Config {
    pub accept_ranges: bool,
    pub cache_control: bool,
    /// `None` only ignores a dotfile in the last segment.
    pub dotfiles: Option<Dotfiles>,
    pub etag: bool,
    pub extensions: Extensions,
    pub fallthrough: bool,
    pub immutable: bool,
    pub index: Index,
    pub last_modified: bool,
    pub max_age: MaxAge,
    pub redirect: bool,
    pub set_headers: Option<SetHeaders>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            accept_ranges: true,
            cache_control: true,
            dotfiles: None,
            etag: true,
            extensions: Extensions::Disabled,
            fallthrough: true,
            immutable: false,
            index: Index::default(),
            last_modified: true,
            max_age: MaxAge::default(),
            redirect: true,
            set_headers: None,
        }
    }
}

impl Config {
    /// Overlay `options` on the defaults, field by field.
    pub fn resolve(options: &ServeStaticOptions) -> Self {
        let defaults = Self::default();
        let options = options.clone();

        Self {
            accept_ranges: options.accept_ranges.unwrap_or(defaults.accept_ranges),
            cache_control: options.cache_control.unwrap_or(defaults.cache_control),
            dotfiles: options.dotfiles.or(defaults.dotfiles),
            etag: options.etag.unwrap_or(defaults.etag),
            extensions: options.extensions.unwrap_or(defaults.extensions),
            fallthrough: options.fallthrough.unwrap_or(defaults.fallthrough),
            immutable: options.immutable.unwrap_or(defaults.immutable),
            index: options.index.unwrap_or(defaults.index),
            last_modified: options.last_modified.unwrap_or(defaults.last_modified),
            max_age: options.max_age.unwrap_or(defaults.max_age),
            redirect: options.redirect.unwrap_or(defaults.redirect),
            set_headers: options.set_headers.or(defaults.set_headers),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_options_resolve_to_defaults() {
        let config = Config::resolve(&ServeStaticOptions::default());

        assert!(config.cache_control);
        assert!(config.etag);
        assert_eq!(config.extensions, Extensions::Disabled);
        assert!(config.fallthrough);
        assert!(!config.immutable);
        assert_eq!(config.index, Index::Files(vec!["index.html".to_owned()]));
        assert!(config.last_modified);
        assert_eq!(config.max_age, MaxAge::Millis(0));
        assert!(config.redirect);
        assert!(config.accept_ranges);
        assert_eq!(config.dotfiles, None);
        assert!(config.set_headers.is_none());
    }

    #[test]
    fn single_override_keeps_other_defaults() {
        let config = Config::resolve(&ServeStaticOptions::new().redirect(false));

        assert!(!config.redirect);
        assert!(config.fallthrough);
        assert!(config.etag);
        assert_eq!(config.index, Index::default());
        assert_eq!(config.max_age, MaxAge::Millis(0));
    }

    #[test]
    fn index_conversions() {
        assert_eq!(Index::from(false), Index::Disabled);
        assert_eq!(Index::from(true), Index::default());
        assert_eq!(
            Index::from(vec!["a.html", "b.html"]).files(),
            ["a.html".to_owned(), "b.html".to_owned()]
        );
        assert!(Index::Disabled.files().is_empty());
    }

    #[test]
    fn max_age_parsing() {
        assert_eq!(MaxAge::from(1500).as_duration(), Duration::from_millis(1500));
        assert_eq!(MaxAge::from("1d").as_duration(), Duration::from_secs(86400));
        assert_eq!(MaxAge::from("2 hours").as_duration(), Duration::from_secs(7200));
        assert_eq!(MaxAge::from("500ms").as_duration(), Duration::from_millis(500));
        assert_eq!(MaxAge::from("90").as_duration(), Duration::from_millis(90));
        assert_eq!(MaxAge::from("-5s").as_duration(), Duration::ZERO);
        assert_eq!(MaxAge::from("soon").as_duration(), Duration::ZERO);
        assert_eq!(
            MaxAge::from("5y").as_duration(),
            Duration::from_secs(60 * 60 * 24 * 365)
        );
    }
}
