use thiserror::Error;

/// Why a gated folder mutation was refused.
///
/// `Protected` is deliberately distinct from `Permission`: a protected system
/// folder can never be deleted or renamed by anyone, superusers included, and
/// callers surface it with a different message than an ordinary denial.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum DenyReason {
    #[error("folder is protected")]
    Protected,
    #[error("permission denied")]
    Permission,
    #[error("folder not found")]
    NotFound,
}
