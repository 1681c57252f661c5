use secrecy::SecretString;

/// Error returned by a [`TokenAccessor`].
pub type TokenError = Box<dyn std::error::Error + Send + Sync>;

/// Source of bearer tokens.
///
/// Called on every request attempt, retries included. Nothing is cached by
/// the transport: refresh and rotation belong to the implementor. An empty
/// token sends the request without an `Authorization` header.
///
/// Closures of type `Fn() -> Result<SecretString, TokenError>` implement this
/// trait directly.
pub trait TokenAccessor: Send + Sync {
    /// Return the token to use for the next attempt.
    ///
    /// # Errors
    /// Any error aborts the request with [`HttpError::Auth`](crate::HttpError::Auth).
    fn bearer_token(&self) -> Result<SecretString, TokenError>;
}

impl<F> TokenAccessor for F
where
    F: Fn() -> Result<SecretString, TokenError> + Send + Sync,
{
    fn bearer_token(&self) -> Result<SecretString, TokenError> {
        self()
    }
}

/// A fixed token.
#[derive(Clone)]
pub struct StaticToken(SecretString);

impl StaticToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::from(token.into()))
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticToken([REDACTED])")
    }
}

impl TokenAccessor for StaticToken {
    fn bearer_token(&self) -> Result<SecretString, TokenError> {
        Ok(self.0.clone())
    }
}
