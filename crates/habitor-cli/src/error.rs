use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] habitor_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No habit name provided")]
    EmptyName,
    #[error("Nothing to change; pass --name and/or --note")]
    NothingToEdit,
    #[error("Invalid habit id: {0}")]
    InvalidId(String),
    #[error("Habit not found: {0}")]
    HabitNotFound(String),
    #[error("Sync failed: {0}")]
    SyncFailed(String),
    #[error("Refusing to discard {0} pending operations without --yes")]
    ConfirmationRequired(usize),
    #[error(
        "Sync is not configured. Set HABITOR_REMOTE_URL or add remote_url to the config file."
    )]
    SyncNotConfigured,
    #[error("Not signed in. Run `habitor sign-in <account>` first.")]
    NotSignedIn,
}
