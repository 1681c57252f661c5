//! Alternate-key URL segments: `accountnumber='A%2F1',name='Contoso'`.
//!
//! Values are OData string literals: an embedded `'` is doubled, then the
//! whole value is percent-encoded so `/`, `'`, `,` and `)` cannot break the
//! path. Parsing reverses both steps.

use crate::error::BatchError;

/// Escape one key value: double `'`, then percent-encode everything outside
/// the unreserved set.
#[must_use]
pub fn escape_key_value(value: &str) -> String {
    urlencoding::encode(&value.replace('\'', "''")).into_owned()
}

/// Render `name='value'` pairs joined by `,`.
///
/// # Errors
/// `BatchError::InvalidAlternateKey` for an empty key list or an empty or
/// non-identifier key name.
pub fn build_alternate_key_segment<K, V>(keys: &[(K, V)]) -> Result<String, BatchError>
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    if keys.is_empty() {
        return Err(BatchError::InvalidAlternateKey(
            "at least one key is required".to_owned(),
        ));
    }

    let mut pairs = Vec::with_capacity(keys.len());
    for (name, value) in keys {
        let name = name.as_ref();
        if !is_key_name(name) {
            return Err(BatchError::InvalidAlternateKey(format!(
                "invalid key name '{name}'"
            )));
        }
        pairs.push(format!("{name}='{}'", escape_key_value(value.as_ref())));
    }
    Ok(pairs.join(","))
}

/// `entity_set(<segment>)`, e.g. `accounts(accountnumber='A%2F1')`.
///
/// # Errors
/// Same as [`build_alternate_key_segment`].
pub fn alternate_key_path<K, V>(entity_set: &str, keys: &[(K, V)]) -> Result<String, BatchError>
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    Ok(format!("{entity_set}({})", build_alternate_key_segment(keys)?))
}

/// Parse a segment produced by [`build_alternate_key_segment`] (surrounding
/// parentheses optional) back into `(name, value)` pairs.
///
/// # Errors
/// `BatchError::InvalidAlternateKey` if the segment is not a list of
/// `name='value'` pairs or a value is not valid percent-encoded UTF-8.
pub fn parse_alternate_key_segment(segment: &str) -> Result<Vec<(String, String)>, BatchError> {
    let inner = segment
        .trim()
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .unwrap_or_else(|| segment.trim());

    if inner.is_empty() {
        return Err(BatchError::InvalidAlternateKey(
            "empty key segment".to_owned(),
        ));
    }

    inner.split(',').map(parse_pair).collect()
}

fn parse_pair(pair: &str) -> Result<(String, String), BatchError> {
    let invalid = || BatchError::InvalidAlternateKey(format!("malformed key pair '{pair}'"));

    let (name, quoted) = pair.split_once('=').ok_or_else(invalid)?;
    let name = name.trim();
    if !is_key_name(name) {
        return Err(invalid());
    }

    let encoded = quoted
        .trim()
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .ok_or_else(invalid)?;
    let decoded = urlencoding::decode(encoded).map_err(|_| invalid())?;

    Ok((name.to_owned(), decoded.replace("''", "'")))
}

fn is_key_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
