use crate::civic::error_sink::{ErrorSink, RejectReason};
use crate::civic::ledger::Ledger;
use crate::civic::paths::{Jurisdiction, StorePaths};

/// Everything a category handler needs for one run. The ledger is the single
/// mutable copy shared by every handler.
pub struct HandlerContext<'a> {
    pub paths: &'a StorePaths,
    pub jurisdiction: &'a Jurisdiction,
    pub sink: &'a ErrorSink,
    pub ledger: &'a mut Ledger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    Saved,
    Rejected(RejectReason),
}

impl HandleOutcome {
    pub fn is_saved(self) -> bool {
        matches!(self, HandleOutcome::Saved)
    }
}
