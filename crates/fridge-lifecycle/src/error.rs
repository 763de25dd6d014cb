use fridge_core::ValidationErrors;
use fridge_storage::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    #[error("Listing not found")]
    NotFound,

    #[error("User not found")]
    UserNotFound,

    #[error("Not authorized to {action} this listing")]
    NotOwner { action: &'static str },

    #[error("Only the person who reserved can {action} this listing")]
    NotReserver { action: &'static str },

    #[error("Cannot reserve your own donation")]
    SelfReservationForbidden,

    #[error("{reason}")]
    InvalidState { reason: &'static str },

    #[error("Cannot rate yourself")]
    SelfRatingForbidden,

    #[error("You can only rate users you have interacted with")]
    NoPriorInteraction,

    #[error("store failure: {0}")]
    Store(#[from] StoreError),
}

impl LifecycleError {
    pub(crate) fn invalid(reason: &'static str) -> Self {
        LifecycleError::InvalidState { reason }
    }

    /// Guard failures a caller can fix, as opposed to faults.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, LifecycleError::Store(_))
    }
}
