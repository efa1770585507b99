use inventory_core::ValidationError;

use crate::client::ClientError;
use crate::context::Interrupted;
use crate::merge::TooManyAttributes;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    TooManyAttributes(#[from] TooManyAttributes),
    #[error("device not found")]
    DevNotFound,
    #[error("group not found")]
    GroupNotFound,
    #[error("ETag does not match")]
    ETagDoesntMatch,
    #[error("write conflict: devices were modified concurrently")]
    WriteConflict,
    #[error("attribute patch is outdated")]
    AttrPatchOutdated,
    #[error("{0} client is not configured")]
    ClientNotConfigured(&'static str),
    #[error(transparent)]
    Interrupted(Interrupted),
    #[error("{context}: {source}")]
    Store {
        context: &'static str,
        #[source]
        source: StoreError,
    },
    #[error("{context}: {source}")]
    Client {
        context: &'static str,
        #[source]
        source: ClientError,
    },
}

/// Coarse classification the HTTP boundary maps to status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    PreconditionFailed,
    Conflict,
    Validation,
    Internal,
}

impl InventoryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InventoryError::DevNotFound | InventoryError::GroupNotFound => ErrorKind::NotFound,
            InventoryError::ETagDoesntMatch | InventoryError::AttrPatchOutdated => {
                ErrorKind::PreconditionFailed
            }
            InventoryError::WriteConflict => ErrorKind::Conflict,
            InventoryError::Validation(_) | InventoryError::TooManyAttributes(_) => {
                ErrorKind::Validation
            }
            InventoryError::ClientNotConfigured(_)
            | InventoryError::Interrupted(_)
            | InventoryError::Store { .. }
            | InventoryError::Client { .. } => ErrorKind::Internal,
        }
    }

    /// Lifts store sentinels into their own variants and wraps anything
    /// else with `context`.
    pub(crate) fn store(context: &'static str) -> impl FnOnce(StoreError) -> Self {
        move |err| match err {
            StoreError::DevNotFound => InventoryError::DevNotFound,
            StoreError::GroupNotFound => InventoryError::GroupNotFound,
            StoreError::ETagDoesntMatch => InventoryError::ETagDoesntMatch,
            StoreError::WriteConflict => InventoryError::WriteConflict,
            StoreError::AttrPatchOutdated => InventoryError::AttrPatchOutdated,
            StoreError::Interrupted(interrupted) => InventoryError::Interrupted(interrupted),
            source => InventoryError::Store { context, source },
        }
    }

    pub(crate) fn client(context: &'static str) -> impl FnOnce(ClientError) -> Self {
        move |err| match err {
            ClientError::Interrupted(interrupted) => InventoryError::Interrupted(interrupted),
            source => InventoryError::Client { context, source },
        }
    }
}
