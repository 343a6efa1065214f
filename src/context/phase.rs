//! Binding phases a context passes through while rotating its transaction.

/// Where the context stands with respect to its worker binding.
///
/// A rotation walks `Bound -> Detached -> BoundNew -> DetachedNew ->
/// CleaningUp -> Released -> Bound`. Only `Bound` and `Poisoned` are ever
/// visible to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingPhase {
    /// The context's own transaction is bound and the query is registered with it.
    Bound,
    /// Nothing is bound; the old transaction is held aside.
    Detached,
    /// The replacement transaction is bound and the query registered with it.
    BoundNew,
    /// Nothing is bound; the replacement is held aside.
    DetachedNew,
    /// The old transaction is rebound to be unregistered from and closed.
    CleaningUp,
    /// The old transaction is closed and unbound.
    Released,
    /// A binding invariant was violated; the context is unusable.
    Poisoned,
}

impl BindingPhase {
    pub fn can_advance_to(self, next: BindingPhase) -> bool {
        use BindingPhase::*;

        matches!(
            (self, next),
            (Bound, Detached)
                | (Detached, BoundNew)
                | (Detached, Bound)
                | (BoundNew, DetachedNew)
                | (DetachedNew, CleaningUp)
                | (CleaningUp, Released)
                | (Released, Bound)
        ) || next == Poisoned
    }
}

impl std::fmt::Display for BindingPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bound => write!(f, "bound"),
            Self::Detached => write!(f, "detached"),
            Self::BoundNew => write!(f, "bound to replacement"),
            Self::DetachedNew => write!(f, "replacement detached"),
            Self::CleaningUp => write!(f, "cleaning up"),
            Self::Released => write!(f, "released"),
            Self::Poisoned => write!(f, "poisoned"),
        }
    }
}
