//! Provider sync adapters: the read-only calendar fan-out and the
//! bidirectional Microsoft To Do sync.

mod calendar;
pub mod ownership;
mod todo;

use thiserror::Error;

pub use calendar::CalendarReader;
pub use todo::{MicrosoftTodoSync, RemoteLink};

use crate::providers::ProviderError;
use crate::tokens::TokenError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
