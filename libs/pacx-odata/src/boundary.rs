use std::fmt;
use uuid::Uuid;

/// Multipart boundary token, `batch_<uuid>` or `changeset_<uuid>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Boundary(String);

impl Boundary {
    #[must_use]
    pub fn batch() -> Self {
        Self(format!("batch_{}", Uuid::new_v4()))
    }

    #[must_use]
    pub fn changeset() -> Self {
        Self(format!("changeset_{}", Uuid::new_v4()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Boundary {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
