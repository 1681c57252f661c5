use crate::error::BatchError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// HTTP verbs allowed inside a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BatchMethod {
    Get,
    Post,
    Patch,
    Delete,
}

impl BatchMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// Writes travel inside the changeset; reads never do.
    #[must_use]
    pub fn is_write(self) -> bool {
        !matches!(self, Self::Get)
    }
}

impl fmt::Display for BatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchMethod {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            _ => Err(BatchError::UnsupportedMethod(s.to_owned())),
        }
    }
}

impl TryFrom<String> for BatchMethod {
    type Error = BatchError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BatchMethod> for String {
    fn from(method: BatchMethod) -> Self {
        method.as_str().to_owned()
    }
}

impl From<BatchMethod> for http::Method {
    fn from(method: BatchMethod) -> Self {
        match method {
            BatchMethod::Get => Self::GET,
            BatchMethod::Post => Self::POST,
            BatchMethod::Patch => Self::PATCH,
            BatchMethod::Delete => Self::DELETE,
        }
    }
}

/// One request carried inside a batch.
///
/// `url` is written verbatim into the embedded request line, so it is either
/// relative to the service root (`accounts(…)`) or absolute. Extra headers are
/// emitted after the generated `Content-Type`/`Accept` header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalOperation {
    method: BatchMethod,
    url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    body: Option<Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    headers: BTreeMap<String, String>,
}

impl LogicalOperation {
    #[must_use]
    pub fn new(method: BatchMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            body: None,
            headers: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(BatchMethod::Get, url)
    }

    #[must_use]
    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self::new(BatchMethod::Post, url).with_body(body)
    }

    #[must_use]
    pub fn patch(url: impl Into<String>, body: Value) -> Self {
        Self::new(BatchMethod::Patch, url).with_body(body)
    }

    #[must_use]
    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(BatchMethod::Delete, url)
    }

    /// Build an operation whose body is any serializable value.
    ///
    /// # Errors
    /// `BatchError::Serialize` if `body` cannot be represented as JSON.
    pub fn with_json<T: Serialize + ?Sized>(
        method: BatchMethod,
        url: impl Into<String>,
        body: &T,
    ) -> Result<Self, BatchError> {
        Ok(Self::new(method, url).with_body(serde_json::to_value(body)?))
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Add a header to the embedded request (e.g. `If-Match: *`).
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn method(&self) -> BatchMethod {
        self.method
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    #[must_use]
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }
}
