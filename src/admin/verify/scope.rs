use std::cmp::Ordering;

use tracing::warn;

use super::accessor::{corrupted, PageAccessor};
use super::{Notice, VerifyCounts, VerifyReport, VerifySeverity};
use crate::admin::error::{CheckError, Corruption};
use crate::admin::options::VerifyOptions;
use crate::storage::gin::{EntryKey, KeyComparator};
use crate::types::{OffsetNumber, PageId};

/// State of one `verify` call. Dropped as a whole when the call returns,
/// whichever way it returns.
pub(crate) struct VerifyScope<'a> {
    relation: &'a str,
    pub(crate) pages: PageAccessor<'a>,
    comparator: KeyComparator,
    options: &'a VerifyOptions,
    notices: Vec<Notice>,
    pub(crate) counts: VerifyCounts,
}

impl<'a> VerifyScope<'a> {
    pub(crate) fn new(
        relation: &'a str,
        pages: PageAccessor<'a>,
        comparator: KeyComparator,
        options: &'a VerifyOptions,
    ) -> Self {
        Self {
            relation,
            pages,
            comparator,
            options,
            notices: Vec::new(),
            counts: VerifyCounts::default(),
        }
    }

    pub(crate) fn relation(&self) -> &str {
        self.relation
    }

    pub(crate) fn validate_postings(&self) -> bool {
        self.options.validate_postings
    }

    pub(crate) fn corrupt(
        &self,
        block: PageId,
        offset: Option<OffsetNumber>,
        reason: Corruption,
    ) -> CheckError {
        corrupted(self.relation, block, offset, reason)
    }

    pub(crate) fn check_interrupt(&self) -> Result<(), CheckError> {
        if self.options.cancel.is_cancelled() {
            return Err(CheckError::Cancelled {
                relation: self.relation.to_owned(),
            });
        }
        Ok(())
    }

    /// Orders two entries read from `block`; undecodable keys are reported
    /// against `offset`.
    pub(crate) fn compare<A, B>(
        &self,
        block: PageId,
        offset: OffsetNumber,
        a: &A,
        b: &B,
    ) -> Result<Ordering, CheckError>
    where
        A: EntryKey + ?Sized,
        B: EntryKey + ?Sized,
    {
        self.comparator
            .compare_entries(a, b)
            .map_err(|err| self.corrupt(block, Some(offset), err.into()))
    }

    pub(crate) fn notice(&mut self, severity: VerifySeverity, message: String) {
        if severity == VerifySeverity::Notice {
            warn!(relation = self.relation, %message, "gin.verify.notice");
        }
        self.notices.push(Notice { severity, message });
    }

    pub(crate) fn finish(self) -> VerifyReport {
        VerifyReport {
            relation: self.relation.to_owned(),
            skipped: false,
            notices: self.notices,
            counts: self.counts,
        }
    }
}
