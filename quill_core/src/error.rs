use sea_orm::{DbErr, SqlErr};
use serde::{Deserialize, Serialize};

use crate::ids::PostId;

/// A single rejected form field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Where the caller should be sent instead of getting a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Redirect {
    /// The action needs a signed-in viewer. `next` is the route to come back to.
    Login { next: String },
    PostDetail { post_id: PostId },
    Profile { username: String },
}

impl Redirect {
    pub fn login(next: impl Into<String>) -> Self {
        Redirect::Login { next: next.into() }
    }
}

/// Result of a user-facing action.
///
/// Denials and form errors are ordinary answers, not failures: nothing was
/// persisted and the caller decides what to show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome<T> {
    Done(T),
    Redirect(Redirect),
    Invalid(Vec<FieldError>),
}

impl<T> Outcome<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, Outcome::Done(_))
    }

    pub fn done(self) -> Option<T> {
        match self {
            Outcome::Done(value) => Some(value),
            _ => None,
        }
    }
}

pub(crate) fn is_unique_violation(error: &DbErr) -> bool {
    matches!(error.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

pub(crate) fn is_foreign_key_violation(error: &DbErr) -> bool {
    matches!(error.sql_err(), Some(SqlErr::ForeignKeyConstraintViolation(_)))
}
