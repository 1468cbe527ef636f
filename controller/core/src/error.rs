use crate::object::ObjectKey;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures surfaced by the control model.
///
/// `Pending` imports, `PolicyDenied` verdicts and conflicting writes are not errors: they
/// are states, verdicts and log events respectively.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A referenced object does not exist.
    #[error("{0} not found")]
    NotFound(ObjectKey),

    /// An import was asked to pick a source while none of its bindings is live.
    #[error("import {0} has no live binding")]
    NoLiveBinding(ObjectKey),

    /// Persisted state could not be read. Fatal at startup.
    #[error("persisted state is corrupt: {0}")]
    Corrupt(String),

    /// A resource could not be converted into a control-model object.
    #[error("invalid {kind} {name}: {reason}")]
    InvalidObject {
        kind: &'static str,
        name: String,
        reason: String,
    },
}

impl Error {
    pub fn invalid(kind: &'static str, name: impl ToString, reason: impl ToString) -> Self {
        Self::InvalidObject {
            kind,
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Returns true for errors the reconciler treats as "not yet resolvable".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
