use pacx_http::{TokenAccessor, TokenError};
use secrecy::SecretString;

/// Variable holding the bearer token
pub const ACCESS_TOKEN_VAR: &str = "PACX_ACCESS_TOKEN";

/// Reads the bearer token from the environment on every request, so an
/// external refresher can rotate it while a long poll runs.
#[derive(Debug, Clone)]
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    #[must_use]
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvToken {
    fn default() -> Self {
        Self::new(ACCESS_TOKEN_VAR)
    }
}

impl TokenAccessor for EnvToken {
    fn bearer_token(&self) -> Result<SecretString, TokenError> {
        match std::env::var(&self.var) {
            Ok(token) => Ok(SecretString::from(token.trim().to_owned())),
            Err(e) => Err(format!("{}: {e}", self.var).into()),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_reads_fresh_value_each_call() {
        let token = EnvToken::new("PACX_TEST_TOKEN_FRESH");

        temp_env::with_var("PACX_TEST_TOKEN_FRESH", Some(" first\n"), || {
            assert_eq!(token.bearer_token().unwrap().expose_secret(), "first");
        });
        temp_env::with_var("PACX_TEST_TOKEN_FRESH", Some("second"), || {
            assert_eq!(token.bearer_token().unwrap().expose_secret(), "second");
        });
    }

    #[test]
    fn test_missing_variable_is_error() {
        let token = EnvToken::new("PACX_TEST_TOKEN_MISSING");
        temp_env::with_var_unset("PACX_TEST_TOKEN_MISSING", || {
            let err = token.bearer_token().unwrap_err();
            assert!(err.to_string().contains("PACX_TEST_TOKEN_MISSING"));
        });
    }
}
