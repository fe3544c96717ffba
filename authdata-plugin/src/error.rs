use std::collections::TryReserveError;

/// Errors reported by authorization-data modules and surfaced by dispatch.
///
/// Capability absence is deliberately not represented here: a module that
/// does not list an operation in its capability set is skipped silently,
/// never reported.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModuleError {
    /// Allocation failed while sizing the module table or merging result
    /// arrays. Aborts the in-progress operation and is never downgraded.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The module holds no data for the request, or no module was
    /// authoritative for it. Tolerated during broadcasts; terminal for
    /// single-responder lookups.
    #[error("no matching authorization data")]
    NotFound,

    /// The module reported a hard failure.
    #[error("{0}")]
    Failed(String),
}

impl ModuleError {
    /// Whether this error is exempt from the informational downgrade.
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(self, Self::ResourceExhausted(_))
    }
}

impl From<TryReserveError> for ModuleError {
    fn from(err: TryReserveError) -> Self {
        Self::ResourceExhausted(err.to_string())
    }
}

pub type ModuleResult<T> = Result<T, ModuleError>;
