use subtle::ConstantTimeEq;

use crate::{
    application::config::AuthMode,
    protocol::{ERROR_UNAVAILABLE, ErrorShape},
};

#[derive(Debug, Clone, Copy)]
pub enum AuthFailureReason {
    MissingCredentials,
    InvalidCredentials,
}

pub fn authorize(
    mode: &AuthMode,
    auth: Option<&crate::protocol::ConnectAuth>,
) -> Result<(), AuthFailureReason> {
    match mode {
        AuthMode::None => Ok(()),
        AuthMode::Token(expected) => {
            let provided = auth.and_then(|value| value.token.as_deref());
            verify_secret(provided, expected)
        }
        AuthMode::Password(expected) => {
            let provided = auth.and_then(|value| value.password.as_deref());
            verify_secret(provided, expected)
        }
    }
}

fn verify_secret(provided: Option<&str>, expected: &str) -> Result<(), AuthFailureReason> {
    let Some(provided) = provided.map(str::trim).filter(|value| !value.is_empty()) else {
        return Err(AuthFailureReason::MissingCredentials);
    };

    if provided.as_bytes().ct_eq(expected.as_bytes()).into() {
        Ok(())
    } else {
        Err(AuthFailureReason::InvalidCredentials)
    }
}

#[must_use]
pub fn auth_failure_error(reason: AuthFailureReason) -> ErrorShape {
    match reason {
        AuthFailureReason::MissingCredentials => {
            ErrorShape::new(ERROR_UNAVAILABLE, "unauthorized: missing credentials")
        }
        AuthFailureReason::InvalidCredentials => {
            ErrorShape::new(ERROR_UNAVAILABLE, "unauthorized: invalid credentials")
        }
    }
}
