use thiserror::Error;

/// Failures surfaced by the token manager and the billing API client.
///
/// Malformed cost rows are deliberately absent: the aggregator filters them
/// instead of failing.
#[derive(Error, Debug)]
pub enum BillingError {
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Rate limit exceeded after {attempts} attempts")]
    RateLimitExceeded { attempts: u32 },
    #[error("HTTP {status}: {body}")]
    Api { status: u16, body: String },
    #[error("Result still paged after {pages} pages")]
    TooManyPages { pages: usize },
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Token store: {0}")]
    TokenStore(String),
}

impl BillingError {
    /// Whether this failure should abort the whole run rather than a single
    /// subscription.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

pub type BillingResult<T> = Result<T, BillingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_auth_errors_are_fatal() {
        assert!(BillingError::Auth("bad secret".into()).is_fatal());
        assert!(!BillingError::RateLimitExceeded { attempts: 5 }.is_fatal());
        assert!(!BillingError::Api {
            status: 500,
            body: String::new()
        }
        .is_fatal());
        assert!(!BillingError::TokenStore("corrupt".into()).is_fatal());
    }

    #[test]
    fn display_includes_status_and_attempts() {
        let err = BillingError::Api {
            status: 403,
            body: "forbidden".into(),
        };
        assert_eq!(err.to_string(), "HTTP 403: forbidden");
        let err = BillingError::RateLimitExceeded { attempts: 5 };
        assert!(err.to_string().contains("5 attempts"));
    }
}
