use crate::error::OperationError;
use pacx_http::HttpResponse;
use serde_json::{Map, Value};
use url::Url;

/// Reference to asynchronous server-side work
#[derive(Debug, Clone, PartialEq)]
pub struct OperationHandle {
    /// Status URL to poll
    pub location: String,
    /// JSON object body of the accepted response, empty otherwise
    pub metadata: Map<String, Value>,
}

impl OperationHandle {
    #[must_use]
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            metadata: Map::new(),
        }
    }

    /// Build a handle from a `202 Accepted` style response.
    ///
    /// `Operation-Location` wins over `Location`.
    ///
    /// # Errors
    /// `OperationError::MissingLocation` when neither header is present.
    pub fn from_accepted(response: &HttpResponse) -> Result<Self, OperationError> {
        let location = ["operation-location", "location"]
            .iter()
            .filter_map(|name| response.header(name))
            .map(str::trim)
            .find(|value| !value.is_empty())
            .ok_or(OperationError::MissingLocation {
                status: response.status().as_u16(),
            })?;

        let metadata = match response.json::<Value>() {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };

        Ok(Self {
            location: location.to_owned(),
            metadata,
        })
    }

    /// Last path segment of the location, query and fragment stripped.
    #[must_use]
    pub fn operation_id(&self) -> Option<String> {
        if let Ok(url) = Url::parse(&self.location) {
            return url
                .path_segments()?
                .rev()
                .find(|segment| !segment.is_empty())
                .map(ToOwned::to_owned);
        }

        self.location
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .split('/')
            .rev()
            .find(|segment| !segment.is_empty())
            .map(ToOwned::to_owned)
    }
}
