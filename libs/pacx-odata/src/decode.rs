use crate::error::BatchError;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use std::time::Duration;

/// Changesets nest one level in practice; anything deeper is rejected.
const MAX_NESTING: usize = 4;

/// One embedded response from a batch
#[derive(Debug, Clone)]
pub struct OperationResult {
    pub(crate) content_id: Option<u32>,
    pub(crate) status: u16,
    pub(crate) reason: String,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
}

impl OperationResult {
    /// `Content-ID` echoed by the service, if any.
    #[must_use]
    pub fn content_id(&self) -> Option<u32> {
        self.content_id
    }

    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Reason phrase exactly as sent; may be empty.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    #[must_use]
    pub fn status_code(&self) -> Option<StatusCode> {
        StatusCode::from_u16(self.status).ok()
    }

    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Deserialize the embedded body.
    ///
    /// # Errors
    /// Returns the JSON error if the body does not match `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// `error.message` from an OData error body.
    #[must_use]
    pub fn service_message(&self) -> Option<String> {
        let value: serde_json::Value = self.json().ok()?;
        value
            .pointer("/error/message")
            .and_then(serde_json::Value::as_str)
            .map(ToOwned::to_owned)
    }

    /// `Retry-After` of a throttled part.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        pacx_http::parse_retry_after(&self.headers)
    }
}

/// Decode a `$batch` response body.
///
/// The boundary is taken from `content_type`. Parts that are themselves
/// `multipart/mixed` (changeset responses) are decoded in place. Both CRLF
/// and bare LF line endings are accepted.
///
/// When every part carries a `Content-ID`, results are returned in
/// Content-ID order, which is submission order for [`encode`](crate::encode)d
/// batches. Otherwise wire order is kept.
///
/// # Errors
/// - `MissingBoundary` if `content_type` has no boundary parameter
/// - `InvalidStatusLine` if an embedded response does not start with a status line
/// - `MalformedPart` / `InvalidHeader` for structurally broken parts
pub fn decode(content_type: &str, body: &[u8]) -> Result<Vec<OperationResult>, BatchError> {
    let boundary = boundary_of(content_type)?;
    let mut results = Vec::new();
    decode_multipart(&boundary, body, 0, &mut results)?;
    if results.iter().all(|r| r.content_id.is_some()) {
        results.sort_by_key(|r| r.content_id);
    }
    Ok(results)
}

fn boundary_of(content_type: &str) -> Result<String, BatchError> {
    let missing = || BatchError::MissingBoundary(content_type.to_owned());

    let mime: mime::Mime = content_type.trim().parse().map_err(|_| missing())?;
    let boundary = mime.get_param(mime::BOUNDARY).ok_or_else(missing)?;
    let boundary = boundary.as_str().trim_matches('"');
    if boundary.is_empty() {
        return Err(missing());
    }
    Ok(boundary.to_owned())
}

fn decode_multipart(
    boundary: &str,
    body: &[u8],
    depth: usize,
    results: &mut Vec<OperationResult>,
) -> Result<(), BatchError> {
    for (index, part) in split_parts(boundary, body).into_iter().enumerate() {
        let (mime_head, payload) = split_head(part).ok_or_else(|| BatchError::MalformedPart {
            index,
            reason: "missing blank line after part headers".to_owned(),
        })?;
        let mime_headers = header_lines(mime_head, index)?;

        let content_type = find_header(&mime_headers, "content-type");
        if let Some(nested) = content_type.filter(|ct| is_multipart(ct)) {
            if depth + 1 >= MAX_NESTING {
                return Err(BatchError::MalformedPart {
                    index,
                    reason: "multipart nesting too deep".to_owned(),
                });
            }
            let nested_boundary = boundary_of(nested)?;
            decode_multipart(&nested_boundary, payload, depth + 1, results)?;
            continue;
        }

        let content_id = find_header(&mime_headers, "content-id").and_then(parse_content_id);
        results.push(parse_embedded_response(payload, content_id, index)?);
    }
    Ok(())
}

fn is_multipart(content_type: &str) -> bool {
    content_type
        .trim_start()
        .get(..10)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("multipart/"))
}

/// Split `body` on `--boundary` delimiter lines. Preamble, epilogue and the
/// closing delimiter are dropped; each part loses the line break that
/// belongs to the following delimiter.
fn split_parts<'a>(boundary: &str, body: &'a [u8]) -> Vec<&'a [u8]> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();

    let mut starts = Vec::new();
    let mut from = 0;
    while let Some(offset) = find(&body[from..], delimiter) {
        let at = from + offset;
        let after = at + delimiter.len();
        let at_line_start = at == 0 || body[at - 1] == b'\n';
        let terminated = body
            .get(after)
            .is_none_or(|c| matches!(c, b'-' | b'\r' | b'\n' | b' ' | b'\t'));
        if at_line_start && terminated {
            starts.push(at);
        }
        from = after;
    }

    let mut parts = Vec::new();
    for (i, &start) in starts.iter().enumerate() {
        let after = start + delimiter.len();
        if body[after..].starts_with(b"--") {
            break;
        }

        let content_start = match find(&body[after..], b"\n") {
            Some(eol) => after + eol + 1,
            None => body.len(),
        };
        let end = starts.get(i + 1).copied().unwrap_or(body.len());
        if content_start >= end {
            continue;
        }

        let part = strip_trailing_newline(&body[content_start..end]);
        if starts.get(i + 1).is_none() && part.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        parts.push(part);
    }
    parts
}

fn strip_trailing_newline(part: &[u8]) -> &[u8] {
    part.strip_suffix(b"\r\n")
        .or_else(|| part.strip_suffix(b"\n"))
        .unwrap_or(part)
}

/// Split at the first blank line, CRLF or LF style.
fn split_head(part: &[u8]) -> Option<(&[u8], &[u8])> {
    if let Some(rest) = part.strip_prefix(b"\r\n") {
        return Some((&part[..0], rest));
    }
    if let Some(rest) = part.strip_prefix(b"\n") {
        return Some((&part[..0], rest));
    }

    let crlf = find(part, b"\r\n\r\n").map(|at| (at, 4));
    let lf = find(part, b"\n\n").map(|at| (at, 2));
    let (at, len) = match (crlf, lf) {
        (Some(a), Some(b)) => {
            if a.0 <= b.0 {
                a
            } else {
                b
            }
        }
        (a, b) => a.or(b)?,
    };
    Some((&part[..at], &part[at + len..]))
}

fn header_lines(head: &[u8], index: usize) -> Result<Vec<(String, String)>, BatchError> {
    let head = std::str::from_utf8(head).map_err(|e| BatchError::MalformedPart {
        index,
        reason: format!("headers are not UTF-8: {e}"),
    })?;

    Ok(head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_owned(), value.trim().to_owned()))
        .filter(|(name, _)| !name.is_empty())
        .collect())
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn parse_content_id(raw: &str) -> Option<u32> {
    raw.trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .trim()
        .parse()
        .ok()
}

fn parse_embedded_response(
    payload: &[u8],
    content_id: Option<u32>,
    index: usize,
) -> Result<OperationResult, BatchError> {
    let (line, rest) = match find(payload, b"\n") {
        Some(eol) => (&payload[..eol], &payload[eol + 1..]),
        None => (payload, &[][..]),
    };
    let line = std::str::from_utf8(line)
        .map_err(|_| BatchError::InvalidStatusLine(String::from_utf8_lossy(line).into_owned()))?;
    let line = line.strip_suffix('\r').unwrap_or(line);
    let (status, reason) = parse_status_line(line)?;

    let (head, body) = if rest.is_empty() {
        (&[][..], &[][..])
    } else {
        split_head(rest).unwrap_or((rest, &rest[rest.len()..]))
    };

    let mut headers = HeaderMap::new();
    for (name, value) in header_lines(head, index)? {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| BatchError::InvalidHeader(name.clone()))?;
        let header_value =
            HeaderValue::from_bytes(value.as_bytes()).map_err(|_| BatchError::InvalidHeader(name.clone()))?;
        headers.append(header_name, header_value);
    }

    Ok(OperationResult {
        content_id,
        status,
        reason,
        headers,
        body: Bytes::copy_from_slice(body),
    })
}

/// `HTTP/<version> <code> <reason...>`
fn parse_status_line(line: &str) -> Result<(u16, String), BatchError> {
    let invalid = || BatchError::InvalidStatusLine(line.to_owned());

    let mut pieces = line.splitn(3, ' ');
    let version = pieces.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(invalid());
    }

    let code = pieces.next().ok_or_else(invalid)?;
    if code.len() != 3 {
        return Err(invalid());
    }
    let status: u16 = code.parse().map_err(|_| invalid())?;
    if !(100..=999).contains(&status) {
        return Err(invalid());
    }

    Ok((status, pieces.next().unwrap_or_default().to_owned()))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
