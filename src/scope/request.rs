use serde::{Deserialize, Serialize};

/// One declared permission scope and who asked for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeRequest {
    pub scope: String,
    pub requester: String,
    pub reason: Option<String>,
}

impl ScopeRequest {
    pub fn new(
        scope: impl Into<String>,
        requester: impl Into<String>,
        reason: Option<String>,
    ) -> Self {
        Self {
            scope: scope.into(),
            requester: requester.into(),
            reason,
        }
    }
}
