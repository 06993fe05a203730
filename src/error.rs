use thiserror::Error;

/// Everything that can go wrong talking to the Persistence Gateway.
///
/// Handlers never propagate the raw driver error to a client: they match on
/// this enum and translate it into the stable `reason` string of a
/// `status=error` frame (see `reason()`).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database pool exhausted or unavailable")]
    Pool(#[from] r2d2::Error),
    #[error("database error: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("no account matches the given target")]
    NotFound,
}

impl StoreError {
    /// Stable, machine-readable reason string sent to clients. Never the raw
    /// driver message, which may leak file paths or column names.
    pub fn reason(&self) -> &'static str {
        match self {
            StoreError::Pool(_) => "storage_unavailable",
            StoreError::Sql(_) => "storage_error",
            StoreError::NotFound => "target_not_found",
        }
    }

    /// True when this wraps a UNIQUE/PRIMARY KEY constraint failure, i.e. a
    /// row already exists where the caller expected to insert a fresh one.
    /// Callers that raced a `user_exists`-then-`insert_user` check (§8's
    /// concurrent-signup property) use this to tell "the name was taken out
    /// from under us" apart from a genuine storage failure.
    pub fn is_unique_violation(&self) -> bool {
        matches!(
            self,
            StoreError::Sql(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

/// Errors surfaced while framing/decoding the wire protocol.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame exceeded maximum size without completing")]
    FrameTooLarge,
}
