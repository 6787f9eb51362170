use std::fmt;

/// Error taxonomy for the billing core (see SPEC_FULL §4.3).
///
/// Every fallible operation in this crate returns one of these variants.
/// The HTTP boundary (`billing-api`) is the only place a variant becomes
/// a status code and a response body; domain code never constructs a
/// transport artifact directly.
#[derive(Debug)]
pub enum Error {
    /// Malformed or missing input; maps to 400.
    Validation(String),
    /// Requested entity does not exist (or is not visible to this tenant); maps to 404.
    NotFound(String),
    /// The request conflicts with existing state (idempotency-key reuse,
    /// duplicate reference_id, refund bound exceeded, double proration); maps to 409.
    Conflict(String),
    /// No authorized tenant context present at all; maps to 401.
    Unauthorized(String),
    /// An authorized tenant context is present but does not match the
    /// requested tenant; maps to 403.
    Forbidden(String),
    /// The external payment processor rejected or failed the call; maps to 502.
    PaymentProcessor(String),
    /// Everything else: database errors, serialization errors, bugs; maps to 500.
    Internal(String),

    /// Relational-store errors, wrapped so the mapper can translate
    /// unique-violation / not-found without leaking engine internals.
    Database(sqlx::Error),
    Serialization(serde_json::Error),
    Io(std::io::Error),
    Config(String),
    Network(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Validation(msg) => write!(f, "Validation error: {}", msg),
            Error::NotFound(msg) => write!(f, "Not found: {}", msg),
            Error::Conflict(msg) => write!(f, "Conflict: {}", msg),
            Error::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            Error::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            Error::PaymentProcessor(msg) => write!(f, "Payment processor error: {}", msg),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
            Error::Database(e) => write!(f, "Database error: {}", e),
            Error::Serialization(e) => write!(f, "Serialization error: {}", e),
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Network(msg) => write!(f, "Network error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Database(e) => Some(e),
            Error::Serialization(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(error: sqlx::Error) -> Self {
        // Translate the two cases the mapper needs a stable shape for;
        // everything else stays a generic Database error at this layer.
        match &error {
            sqlx::Error::RowNotFound => Error::NotFound("Record not found".to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Error::Conflict("Duplicate".to_string())
            }
            _ => Error::Database(error),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Serialization(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Io(error)
    }
}

impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Self {
        Error::Config(error.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        Error::Network(error.to_string())
    }
}

impl From<uuid::Error> for Error {
    fn from(error: uuid::Error) -> Self {
        Error::Validation(format!("Invalid UUID: {}", error))
    }
}

impl Error {
    pub fn validation<T: Into<String>>(msg: T) -> Self {
        Error::Validation(msg.into())
    }

    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn conflict<T: Into<String>>(msg: T) -> Self {
        Error::Conflict(msg.into())
    }

    pub fn unauthorized<T: Into<String>>(msg: T) -> Self {
        Error::Unauthorized(msg.into())
    }

    pub fn forbidden<T: Into<String>>(msg: T) -> Self {
        Error::Forbidden(msg.into())
    }

    pub fn payment_processor<T: Into<String>>(msg: T) -> Self {
        Error::PaymentProcessor(msg.into())
    }

    pub fn internal<T: Into<String>>(msg: T) -> Self {
        Error::Internal(msg.into())
    }

    /// Stable HTTP-like status code per SPEC_FULL §4.3.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::Unauthorized(_) => 401,
            Error::Forbidden(_) => 403,
            Error::NotFound(_) => 404,
            Error::Conflict(_) => 409,
            Error::PaymentProcessor(_) => 502,
            Error::Internal(_) => 500,
            Error::Database(_) => 500,
            Error::Serialization(_) => 500,
            Error::Io(_) => 500,
            Error::Config(_) => 500,
            Error::Network(_) => 502,
        }
    }

    /// Stable category for logging/metrics, never surfaced with engine internals.
    pub fn category(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::NotFound(_) => "not_found",
            Error::Conflict(_) => "conflict",
            Error::Unauthorized(_) => "unauthorized",
            Error::Forbidden(_) => "forbidden",
            Error::PaymentProcessor(_) => "payment_processor",
            Error::Internal(_) => "internal",
            Error::Database(_) => "database",
            Error::Serialization(_) => "serialization",
            Error::Io(_) => "io",
            Error::Config(_) => "config",
            Error::Network(_) => "network",
        }
    }

    /// Message safe to surface to a caller in production mode: the typed
    /// kinds carry their own message; the opaque kinds get a generic one
    /// so relational-engine error text and stack traces never leak.
    pub fn safe_message(&self, production: bool) -> String {
        if !production {
            return self.to_string();
        }
        match self {
            Error::Validation(msg)
            | Error::NotFound(msg)
            | Error::Conflict(msg)
            | Error::Unauthorized(msg)
            | Error::Forbidden(msg)
            | Error::PaymentProcessor(msg) => msg.clone(),
            Error::Internal(_)
            | Error::Database(_)
            | Error::Serialization(_)
            | Error::Io(_)
            | Error::Config(_)
            | Error::Network(_) => "An internal error occurred".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_taxonomy() {
        assert_eq!(Error::validation("x").status_code(), 400);
        assert_eq!(Error::unauthorized("x").status_code(), 401);
        assert_eq!(Error::forbidden("x").status_code(), 403);
        assert_eq!(Error::not_found("x").status_code(), 404);
        assert_eq!(Error::conflict("x").status_code(), 409);
        assert_eq!(Error::payment_processor("x").status_code(), 502);
        assert_eq!(Error::internal("x").status_code(), 500);
    }

    #[test]
    fn production_mode_redacts_internal_errors() {
        let err = Error::Internal("raw engine trace".to_string());
        assert_eq!(err.safe_message(true), "An internal error occurred");
        assert!(err.safe_message(false).contains("raw engine trace"));
    }

    #[test]
    fn production_mode_keeps_typed_messages() {
        let err = Error::conflict("Idempotency-Key reuse with different payload");
        assert_eq!(
            err.safe_message(true),
            "Idempotency-Key reuse with different payload"
        );
    }
}
