use crate::boundary::Boundary;
use crate::error::BatchError;
use crate::operation::LogicalOperation;
use bytes::Bytes;

const CRLF: &str = "\r\n";

/// Encoded `$batch` request body with its boundaries
#[derive(Debug, Clone)]
pub struct BatchRequest {
    boundary: Boundary,
    changeset: Option<Boundary>,
    body: Bytes,
}

impl BatchRequest {
    /// Value for the outer `Content-Type` header.
    #[must_use]
    pub fn content_type(&self) -> String {
        format!("multipart/mixed; boundary={}", self.boundary)
    }

    #[must_use]
    pub fn boundary(&self) -> &Boundary {
        &self.boundary
    }

    /// Changeset boundary, present only when the batch carries writes.
    #[must_use]
    pub fn changeset(&self) -> Option<&Boundary> {
        self.changeset.as_ref()
    }

    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    #[must_use]
    pub fn into_body(self) -> Bytes {
        self.body
    }
}

/// Encode `operations` into one `multipart/mixed` batch.
///
/// Content-IDs are assigned `1..=n` in submission order. Reads become direct
/// batch parts. Every write goes into a single changeset, placed where the
/// first write appears, so reads before and after it keep their relative
/// position.
///
/// # Errors
/// `BatchError::Serialize` if an operation body cannot be rendered as JSON.
pub fn encode(operations: &[LogicalOperation]) -> Result<BatchRequest, BatchError> {
    let boundary = Boundary::batch();
    let first_write = operations.iter().position(|op| op.method().is_write());
    let changeset = first_write.map(|_| Boundary::changeset());

    let mut out = String::new();

    for (index, op) in operations.iter().enumerate() {
        let content_id = index + 1;

        if !op.method().is_write() {
            open_part(&mut out, &boundary);
            write_operation(&mut out, op, content_id)?;
            continue;
        }

        if Some(index) == first_write
            && let Some(changeset) = &changeset
        {
            open_part(&mut out, &boundary);
            push_line(&mut out, &format!("Content-Type: multipart/mixed; boundary={changeset}"));
            out.push_str(CRLF);

            for (write_index, write) in operations
                .iter()
                .enumerate()
                .filter(|(_, op)| op.method().is_write())
            {
                open_part(&mut out, changeset);
                write_operation(&mut out, write, write_index + 1)?;
            }
            push_line(&mut out, &format!("--{changeset}--"));
        }
    }

    push_line(&mut out, &format!("--{boundary}--"));

    Ok(BatchRequest {
        boundary,
        changeset,
        body: Bytes::from(out),
    })
}

fn push_line(out: &mut String, line: &str) {
    out.push_str(line);
    out.push_str(CRLF);
}

fn open_part(out: &mut String, boundary: &Boundary) {
    push_line(out, &format!("--{boundary}"));
}

/// MIME part headers, blank line, then the embedded HTTP request.
fn write_operation(
    out: &mut String,
    op: &LogicalOperation,
    content_id: usize,
) -> Result<(), BatchError> {
    let body = op.body().map(serde_json::to_string).transpose()?;

    push_line(out, "Content-Type: application/http");
    push_line(out, "Content-Transfer-Encoding: binary");
    push_line(out, &format!("Content-ID: {content_id}"));
    out.push_str(CRLF);

    push_line(out, &format!("{} {} HTTP/1.1", op.method(), op.url()));
    if !op.method().is_write() {
        push_line(out, "Accept: application/json");
    } else if body.is_some() {
        push_line(out, "Content-Type: application/json; charset=utf-8");
    }
    for (name, value) in op.headers() {
        push_line(out, &format!("{name}: {value}"));
    }
    out.push_str(CRLF);

    if let Some(body) = body {
        push_line(out, &body);
    }
    Ok(())
}
