//! Request-level error taxonomy
//!
//! Every handler returns `Result<Response, RequestError>`. The dispatcher turns
//! an error into a bare `{"status": N}` reply and keeps serving the connection;
//! nothing here closes a socket.

use crate::auth::AuthError;
use duel_shared::Status;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RequestError {
    /// Token could not be verified, or names a user with no record.
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("username {0:?} is already registered")]
    Conflict(String),

    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("user {0:?} is already logged in")]
    AlreadyLoggedIn(String),

    /// The action was repeated past its allowed count.
    #[error("sequencing error: {0}")]
    Sequencing(&'static str),

    /// The action is not valid in the game's current phase.
    #[error("precondition failed: {0}")]
    Precondition(&'static str),

    #[error("rule violation: {0}")]
    RuleViolation(&'static str),
}

impl RequestError {
    pub fn status(&self) -> Status {
        match self {
            RequestError::Auth(_) | RequestError::InvalidCredentials => Status::InvalidData,
            RequestError::Conflict(_) => Status::Conflict,
            RequestError::AlreadyLoggedIn(_) => Status::AlreadyLoggedIn,
            RequestError::Sequencing(_) | RequestError::Precondition(_) => {
                Status::MethodNotAllowed
            }
            RequestError::RuleViolation(_) => Status::NotAcceptable,
        }
    }
}

pub type Result<T> = std::result::Result<T, RequestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            RequestError::Auth(AuthError::UnknownUser).status().code(),
            401
        );
        assert_eq!(RequestError::InvalidCredentials.status().code(), 401);
        assert_eq!(RequestError::Conflict("ann".into()).status().code(), 409);
        assert_eq!(
            RequestError::AlreadyLoggedIn("ann".into()).status().code(),
            403
        );
        assert_eq!(RequestError::Sequencing("third answer").status().code(), 405);
        assert_eq!(RequestError::Precondition("not started").status().code(), 405);
        assert_eq!(RequestError::RuleViolation("self vote").status().code(), 406);
    }
}
