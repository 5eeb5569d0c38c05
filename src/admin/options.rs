use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::admin::catalog::SessionId;
use crate::admin::sanity::{DefaultPageSanity, PageSanity};

/// Cooperative cancellation flag shared with the caller.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation; the walk stops before its next page.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// True once [`CancelToken::cancel`] was called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Options for [`crate::admin::verify`].
#[derive(Clone)]
pub struct VerifyOptions {
    /// Session performing the check; decides which temporary indexes are visible.
    pub session: SessionId,
    /// Whether the host is replaying WAL. Unlogged indexes are skipped then.
    pub in_recovery: bool,
    /// Decode leaf posting lists and walk posting trees.
    pub validate_postings: bool,
    /// Generic per-page check run before a page is interpreted.
    pub sanity: Arc<dyn PageSanity>,
    /// Checked once per visited page.
    pub cancel: CancelToken,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            session: SessionId::default(),
            in_recovery: false,
            validate_postings: true,
            sanity: Arc::new(DefaultPageSanity::default()),
            cancel: CancelToken::new(),
        }
    }
}

impl fmt::Debug for VerifyOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifyOptions")
            .field("session", &self.session)
            .field("in_recovery", &self.in_recovery)
            .field("validate_postings", &self.validate_postings)
            .field("sanity", &self.sanity)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
