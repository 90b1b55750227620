//! Process exit codes and remediation hints

use crate::api::ApiError;
use crate::auth::AuthError;

pub const SUCCESS: u8 = 0;
pub const GENERIC: u8 = 1;
pub const USAGE: u8 = 2;
pub const AUTH: u8 = 3;
pub const NOT_FOUND: u8 = 4;
pub const RATE_LIMIT: u8 = 5;

const LOGIN_HINT: &str = "Run: raindrop auth token <token>\n  or:  raindrop auth login";
const SETUP_HINT: &str = "Run: raindrop auth setup <client_id>";

/// The auth or API error anywhere in the chain, outermost first.
fn classify(err: &anyhow::Error) -> Option<Kind<'_>> {
    err.chain().find_map(|cause| {
        if let Some(e) = cause.downcast_ref::<AuthError>() {
            return Some(Kind::Auth(e));
        }
        match cause.downcast_ref::<ApiError>() {
            Some(ApiError::Auth(e)) => Some(Kind::Auth(e)),
            Some(e) => Some(Kind::Api(e)),
            None => None,
        }
    })
}

enum Kind<'a> {
    Auth(&'a AuthError),
    Api(&'a ApiError),
}

pub fn exit_code(err: &anyhow::Error) -> u8 {
    match classify(err) {
        Some(Kind::Auth(e)) if e.is_auth_failure() => AUTH,
        Some(Kind::Api(ApiError::Unauthorized)) => AUTH,
        Some(Kind::Api(ApiError::NotFound)) => NOT_FOUND,
        Some(Kind::Api(ApiError::RateLimited)) => RATE_LIMIT,
        _ => GENERIC,
    }
}

/// What the user can do about `err`, if anything specific.
pub fn hint(err: &anyhow::Error) -> Option<&'static str> {
    match classify(err)? {
        Kind::Auth(AuthError::NoCredentials) => Some(SETUP_HINT),
        Kind::Auth(e) if e.is_auth_failure() => Some(LOGIN_HINT),
        Kind::Api(ApiError::Unauthorized) => Some(LOGIN_HINT),
        Kind::Api(ApiError::RateLimited) => Some("Wait and try again"),
        Kind::Api(ApiError::Status { status: 403, .. }) => Some("Check your token permissions"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    fn wrapped<E>(e: E) -> anyhow::Error
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Err::<(), _>(e).context("outer operation").unwrap_err()
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(&wrapped(AuthError::NotAuthenticated)), AUTH);
        assert_eq!(exit_code(&wrapped(AuthError::NoCredentials)), AUTH);
        assert_eq!(
            exit_code(&wrapped(AuthError::TokenExchangeFailed {
                status: 400,
                body: "invalid_grant".into()
            })),
            AUTH
        );
        assert_eq!(exit_code(&wrapped(ApiError::Unauthorized)), AUTH);
        assert_eq!(
            exit_code(&wrapped(ApiError::Auth(AuthError::NotAuthenticated))),
            AUTH
        );
        assert_eq!(exit_code(&wrapped(ApiError::NotFound)), NOT_FOUND);
        assert_eq!(exit_code(&wrapped(ApiError::RateLimited)), RATE_LIMIT);
        assert_eq!(exit_code(&wrapped(AuthError::NoTty)), GENERIC);
        assert_eq!(exit_code(&anyhow::anyhow!("boom")), GENERIC);
    }

    #[test]
    fn test_hints() {
        assert_eq!(hint(&wrapped(AuthError::NoCredentials)), Some(SETUP_HINT));
        assert_eq!(hint(&wrapped(AuthError::NotAuthenticated)), Some(LOGIN_HINT));
        assert_eq!(hint(&wrapped(ApiError::Unauthorized)), Some(LOGIN_HINT));
        assert_eq!(
            hint(&wrapped(ApiError::Status {
                status: 403,
                body: String::new()
            })),
            Some("Check your token permissions")
        );
        assert_eq!(hint(&wrapped(AuthError::Cancelled)), None);
        assert_eq!(hint(&anyhow::anyhow!("boom")), None);
    }
}
