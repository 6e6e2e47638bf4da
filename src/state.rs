use std::path::{Path, PathBuf};

use crate::error::SendError;

/// Where a request is in its life with the file stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Started,
    DirectoryFound,
    FileFound,
    Errored,
}

/// What to do with an error reported by the file stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    /// Let the next service try, as if this one never matched.
    Continue,
    /// Fail the request with the error.
    Forward,
}

/// Per-request bookkeeping, created for every request and never shared.
#[derive(Debug)]
pub(crate) struct RequestContext {
    lookup_path: String,
    resolved_path: PathBuf,
    forward_errors_always: bool,
    phase: Phase,
}

impl RequestContext {
    pub(crate) fn new(lookup_path: String, fallthrough: bool) -> Self {
        Self {
            resolved_path: PathBuf::from(&lookup_path),
            lookup_path,
            forward_errors_always: !fallthrough,
            phase: Phase::Started,
        }
    }

    pub(crate) fn lookup_path(&self) -> &str {
        &self.lookup_path
    }

    pub(crate) fn resolved_path(&self) -> &Path {
        &self.resolved_path
    }

    pub(crate) fn into_resolved_path(self) -> PathBuf {
        self.resolved_path
    }

    pub(crate) fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn had_error(&self) -> bool {
        self.phase == Phase::Errored
    }

    pub(crate) fn directory_found(&mut self) {
        self.phase = Phase::DirectoryFound;
    }

    /// Once a concrete file is picked, any later failure is a real error.
    pub(crate) fn file_found(&mut self, path: &Path) {
        self.resolved_path = path.to_path_buf();
        self.forward_errors_always = true;
        self.phase = Phase::FileFound;
    }

    pub(crate) fn errored(&mut self, err: &SendError) -> Disposition {
        self.phase = Phase::Errored;

        if self.forward_errors_always || !err.is_client_error() {
            Disposition::Forward
        } else {
            Disposition::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use http::StatusCode;

    use super::*;

    fn error(status: StatusCode) -> SendError {
        SendError::new(status)
    }

    #[test]
    fn client_errors_continue_with_fallthrough() {
        let mut ctx = RequestContext::new("/missing".to_owned(), true);
        assert_eq!(ctx.phase(), Phase::Started);
        assert_eq!(ctx.errored(&error(StatusCode::NOT_FOUND)), Disposition::Continue);
        assert!(ctx.had_error());
    }

    #[test]
    fn client_errors_forward_without_fallthrough() {
        let mut ctx = RequestContext::new("/missing".to_owned(), false);
        assert_eq!(ctx.errored(&error(StatusCode::NOT_FOUND)), Disposition::Forward);
    }

    #[test]
    fn server_errors_always_forward() {
        let mut ctx = RequestContext::new("/x".to_owned(), true);
        assert_eq!(
            ctx.errored(&error(StatusCode::INTERNAL_SERVER_ERROR)),
            Disposition::Forward
        );
    }

    #[test]
    fn errors_after_file_found_forward() {
        let mut ctx = RequestContext::new("/a".to_owned(), true);
        ctx.file_found(Path::new("/srv/a.html"));
        assert_eq!(ctx.phase(), Phase::FileFound);
        assert_eq!(ctx.resolved_path(), Path::new("/srv/a.html"));
        assert_eq!(
            ctx.errored(&error(StatusCode::PRECONDITION_FAILED)),
            Disposition::Forward
        );
    }

    #[test]
    fn resolved_path_starts_as_lookup_path() {
        let mut ctx = RequestContext::new(String::new(), true);
        assert_eq!(ctx.lookup_path(), "");
        assert_eq!(ctx.resolved_path(), Path::new(""));

        ctx.directory_found();
        assert_eq!(ctx.phase(), Phase::DirectoryFound);
        assert!(!ctx.had_error());
    }
}
