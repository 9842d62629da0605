//! Streaming multipart/form-data parser for POST object uploads.
//!
//! The body is consumed through an internal buffer refilled in
//! `MAX_CHUNK_SIZE` chunks, so the object payload is never required to fit
//! in one read. The reader walks the classic state machine: preamble up to
//! the first `--boundary`, CRLF-terminated part-header lines, part body up
//! to the next boundary, and the final `--boundary--` marker (with or
//! without a trailing CRLF).

use bytes::{Buf, Bytes, BytesMut};
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Refill granularity for the streaming buffer.
pub const MAX_CHUNK_SIZE: usize = 512 * 1024;

#[derive(Debug, Error)]
pub enum FormError {
    #[error("request is not multipart/form-data")]
    NotMultipart,

    #[error("multipart content type carries no boundary")]
    MissingBoundary,

    #[error("form ended without a file part")]
    MissingData,

    #[error("malformed form part: {0}")]
    Malformed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One part-header field: the leading value plus its `key=val` parameters,
/// e.g. `form-data; name="key"` under `Content-Disposition`.
#[derive(Debug, Clone, Default)]
pub struct FieldValue {
    pub value: String,
    pub params: BTreeMap<String, String>,
}

/// Parsed headers of one form part.
#[derive(Debug, Default)]
pub struct FormPart {
    fields: BTreeMap<String, FieldValue>,
}

impl FormPart {
    /// Case-insensitive header lookup.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// The `name` parameter of the Content-Disposition header.
    pub fn name(&self) -> Option<&str> {
        self.field("Content-Disposition")?
            .params
            .get("name")
            .map(|s| s.as_str())
    }

    /// The `filename` parameter of the Content-Disposition header.
    pub fn filename(&self) -> Option<&str> {
        self.field("Content-Disposition")?
            .params
            .get("filename")
            .map(|s| s.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.field("Content-Type").map(|f| f.value.as_str())
    }
}

/// Parse `first; key=val; key2=val2`, stripping whitespace and any
/// surrounding quotes from parameter values.
fn parse_params(input: &str) -> (String, BTreeMap<String, String>) {
    let mut params = BTreeMap::new();
    let mut pieces = input.split(';');
    let first = pieces.next().unwrap_or("").trim().to_string();
    for piece in pieces {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        match piece.split_once('=') {
            Some((k, v)) => {
                let v = v.trim().trim_matches('"');
                params.insert(k.trim().to_string(), v.to_string());
            }
            None => {
                params.insert(piece.to_string(), String::new());
            }
        }
    }
    (first, params)
}

/// Parse one header line: `Field-Name: value; key=val`.
fn parse_part_field(line: &str) -> Result<(String, FieldValue), FormError> {
    let (name, rest) = line
        .split_once(':')
        .ok_or_else(|| FormError::Malformed(format!("header line without colon: {}", line)))?;
    let (value, params) = parse_params(rest);
    Ok((name.trim().to_string(), FieldValue { value, params }))
}

enum Scan {
    /// Boundary found at this offset.
    Boundary(usize),
    /// check-eol mode: a full line ends at this offset (past the LF).
    Line(usize),
    None,
}

/// The streaming reader. `boundary` is the full delimiter including the
/// leading dashes.
pub struct FormReader<R> {
    src: R,
    boundary: Vec<u8>,
    buf: BytesMut,
    eof: bool,
}

impl<R: AsyncRead + Unpin> FormReader<R> {
    pub fn new(src: R, boundary: &str) -> Self {
        Self {
            src,
            boundary: format!("--{}", boundary).into_bytes(),
            buf: BytesMut::new(),
            eof: false,
        }
    }

    async fn fill_to(&mut self, target: usize) -> Result<(), FormError> {
        while self.buf.len() < target && !self.eof {
            self.buf.reserve(MAX_CHUNK_SIZE);
            let n = self.src.read_buf(&mut self.buf).await?;
            if n == 0 {
                self.eof = true;
            }
        }
        Ok(())
    }

    fn scan(&self, window: usize, check_eol: bool) -> Scan {
        let hay = &self.buf[..window.min(self.buf.len())];
        let needle = &self.boundary[..];
        for i in 0..hay.len() {
            if hay.len() - i >= needle.len() && &hay[i..i + needle.len()] == needle {
                return Scan::Boundary(i);
            }
            if check_eol && hay[i] == b'\n' {
                return Scan::Line(i + 1);
            }
        }
        Scan::None
    }

    /// Read up to `max` bytes of content. Returns the content, whether a
    /// boundary terminated it, and whether that boundary was the final
    /// `--boundary--` marker. The boundary itself and its trailing CRLF
    /// are consumed.
    async fn read_with_boundary(
        &mut self,
        max: usize,
        check_eol: bool,
    ) -> Result<(Bytes, bool, bool), FormError> {
        // Extra room past `max` lets a boundary straddling the edge be
        // recognized instead of split.
        let window = max + self.boundary.len() + 2;
        self.fill_to(window).await?;

        let (content_len, reached) = match self.scan(window, check_eol) {
            Scan::Boundary(i) => (i, true),
            Scan::Line(i) => (i, false),
            Scan::None => (max.min(self.buf.len()), false),
        };
        let content = self.buf.split_to(content_len).freeze();

        let mut done = false;
        if reached {
            self.fill_to(self.boundary.len() + 2).await?;
            let skip = self.boundary.len().min(self.buf.len());
            self.buf.advance(skip);

            let mut was_eol = false;
            for _ in 0..2 {
                match self.buf.first() {
                    Some(&c) if c == b'\r' || c == b'\n' => {
                        self.buf.advance(1);
                        was_eol = true;
                    }
                    _ => break,
                }
            }
            if !was_eol && self.buf.len() >= 2 && &self.buf[..2] == b"--" {
                done = true;
            }
        }
        Ok((content, reached, done))
    }

    /// Line-oriented read used for part headers: stops at the first LF
    /// even before any boundary.
    async fn read_line(&mut self, max: usize) -> Result<(Bytes, bool, bool), FormError> {
        self.read_with_boundary(max, true).await
    }

    /// Bulk read used for part bodies.
    async fn read_data(&mut self, max: usize) -> Result<(Bytes, bool, bool), FormError> {
        self.read_with_boundary(max, false).await
    }

    /// Read the header block of the next part. `None` means the final
    /// boundary was reached instead of another part.
    pub async fn read_part_header(&mut self) -> Result<Option<FormPart>, FormError> {
        let (mut line, reached, done) = self.read_line(MAX_CHUNK_SIZE).await?;
        if done {
            return Ok(None);
        }
        if reached {
            // that was the opening boundary; the first header line follows
            let (next, _, done) = self.read_line(MAX_CHUNK_SIZE).await?;
            if done {
                return Ok(None);
            }
            line = next;
        }

        let mut part = FormPart::default();
        loop {
            let text = String::from_utf8_lossy(&line);
            let text = text.trim();
            if text.is_empty() {
                break;
            }
            let (name, value) = parse_part_field(text)?;
            part.fields.insert(name, value);

            let (next, reached, done) = self.read_line(MAX_CHUNK_SIZE).await?;
            line = next;
            if reached || done {
                break;
            }
        }
        Ok(Some(part))
    }

    /// Read the body of the current part up to the next boundary. The
    /// CRLF that delimits the body from the boundary is not part of the
    /// content. Returns the body and whether the stream is done.
    pub async fn read_part_body(&mut self) -> Result<(Bytes, bool), FormError> {
        let mut out = BytesMut::new();
        loop {
            let (chunk, reached, done) = self.read_data(MAX_CHUNK_SIZE).await?;
            let at_end = reached || done;
            if chunk.is_empty() && !at_end {
                return Err(FormError::Malformed(
                    "unexpected end of stream inside form part".to_string(),
                ));
            }
            out.extend_from_slice(&chunk);
            if at_end {
                strip_trailing_eol(&mut out);
                return Ok((out.freeze(), done));
            }
        }
    }
}

fn strip_trailing_eol(buf: &mut BytesMut) {
    if buf.last() == Some(&b'\n') {
        buf.truncate(buf.len() - 1);
        if buf.last() == Some(&b'\r') {
            buf.truncate(buf.len() - 1);
        }
    }
}

/// Fully parsed POST object form.
#[derive(Debug)]
pub struct PostForm {
    /// Non-file form fields, values trimmed of surrounding whitespace.
    pub params: BTreeMap<String, String>,
    /// `filename` from the file part, if supplied.
    pub filename: Option<String>,
    /// Content-Type of the file part.
    pub file_content_type: Option<String>,
    /// The object payload.
    pub file: Bytes,
}

impl PostForm {
    /// The object key: an explicit `key` field wins, otherwise the
    /// uploaded filename.
    pub fn key(&self) -> Option<&str> {
        self.params
            .get("key")
            .map(|s| s.as_str())
            .filter(|s| !s.is_empty())
            .or(self.filename.as_deref())
    }
}

/// Drive the reader over a whole request body. The Content-Type header
/// supplies the boundary.
pub async fn parse_post_form<R: AsyncRead + Unpin>(
    src: R,
    content_type: &str,
) -> Result<PostForm, FormError> {
    let (mime, ct_params) = parse_params(content_type);
    if mime != "multipart/form-data" {
        return Err(FormError::NotMultipart);
    }
    let boundary = ct_params
        .get("boundary")
        .filter(|b| !b.is_empty())
        .ok_or(FormError::MissingBoundary)?;

    let mut reader = FormReader::new(src, boundary);
    let mut params = BTreeMap::new();
    let mut file: Option<(Bytes, Option<String>, Option<String>)> = None;

    loop {
        let part = match reader.read_part_header().await? {
            Some(p) => p,
            None => break,
        };
        let name = part.name().unwrap_or("").to_string();
        let (body, done) = reader.read_part_body().await?;
        if name == "file" {
            let filename = part.filename().map(|s| s.to_string());
            let content_type = part.content_type().map(|s| s.to_string());
            file = Some((body, filename, content_type));
        } else if !name.is_empty() {
            let value = String::from_utf8_lossy(&body).trim().to_string();
            params.insert(name, value);
        }
        if done {
            break;
        }
    }

    let (file, filename, file_content_type) = file.ok_or(FormError::MissingData)?;
    Ok(PostForm {
        params,
        filename,
        file_content_type,
        file,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run<F: std::future::Future>(fut: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(fut)
    }

    #[test]
    fn test_parse_params_basic() {
        let (first, params) = parse_params("form-data; name=\"key\"; filename=\"a.txt\"");
        assert_eq!(first, "form-data");
        assert_eq!(params["name"], "key");
        assert_eq!(params["filename"], "a.txt");
    }

    #[test]
    fn test_parse_params_no_params() {
        let (first, params) = parse_params("multipart/form-data");
        assert_eq!(first, "multipart/form-data");
        assert!(params.is_empty());
    }

    #[test]
    fn test_parse_part_field() {
        let (name, fv) = parse_part_field("Content-Type: text/plain; charset=utf-8").unwrap();
        assert_eq!(name, "Content-Type");
        assert_eq!(fv.value, "text/plain");
        assert_eq!(fv.params["charset"], "utf-8");
    }

    #[test]
    fn test_parse_part_field_rejects_missing_colon() {
        assert!(parse_part_field("not a header").is_err());
    }

    // The literal wire example from the S3 POST object documentation.
    const SIMPLE: &[u8] = b"--B\r\nContent-Disposition: form-data; name=\"key\"\r\n\r\nhello.txt\r\n--B\r\nContent-Disposition: form-data; name=\"file\"; filename=\"hello.txt\"\r\nContent-Type: text/plain\r\n\r\nHELLO\r\n--B--\r\n";

    #[test]
    fn test_simple_form() {
        let form = run(parse_post_form(SIMPLE, "multipart/form-data; boundary=B")).unwrap();
        assert_eq!(form.params["key"], "hello.txt");
        assert_eq!(form.file.as_ref(), b"HELLO");
        assert_eq!(form.file_content_type.as_deref(), Some("text/plain"));
        assert_eq!(form.filename.as_deref(), Some("hello.txt"));
        assert_eq!(form.key(), Some("hello.txt"));
    }

    #[test]
    fn test_final_boundary_without_trailing_crlf() {
        let body = b"--B\r\nContent-Disposition: form-data; name=\"file\"; filename=\"f\"\r\n\r\nDATA\r\n--B--";
        let form = run(parse_post_form(&body[..], "multipart/form-data; boundary=B")).unwrap();
        assert_eq!(form.file.as_ref(), b"DATA");
    }

    #[test]
    fn test_key_defaults_to_filename() {
        let body = b"--B\r\nContent-Disposition: form-data; name=\"file\"; filename=\"upload.bin\"\r\n\r\nxyz\r\n--B--\r\n";
        let form = run(parse_post_form(&body[..], "multipart/form-data; boundary=B")).unwrap();
        assert_eq!(form.key(), Some("upload.bin"));
    }

    #[test]
    fn test_explicit_key_wins_over_filename() {
        let form = run(parse_post_form(SIMPLE, "multipart/form-data; boundary=B")).unwrap();
        // `key` field present; filename identical here, so use a variant
        let body = b"--B\r\nContent-Disposition: form-data; name=\"key\"\r\n\r\nchosen\r\n--B\r\nContent-Disposition: form-data; name=\"file\"; filename=\"other\"\r\n\r\nx\r\n--B--\r\n";
        let form2 = run(parse_post_form(&body[..], "multipart/form-data; boundary=B")).unwrap();
        assert_eq!(form.key(), Some("hello.txt"));
        assert_eq!(form2.key(), Some("chosen"));
    }

    #[test]
    fn test_missing_file_part() {
        let body = b"--B\r\nContent-Disposition: form-data; name=\"key\"\r\n\r\nv\r\n--B--\r\n";
        let err = run(parse_post_form(&body[..], "multipart/form-data; boundary=B")).unwrap_err();
        assert!(matches!(err, FormError::MissingData));
    }

    #[test]
    fn test_not_multipart() {
        let err = run(parse_post_form(&b""[..], "application/xml")).unwrap_err();
        assert!(matches!(err, FormError::NotMultipart));
    }

    #[test]
    fn test_missing_boundary() {
        let err = run(parse_post_form(&b""[..], "multipart/form-data")).unwrap_err();
        assert!(matches!(err, FormError::MissingBoundary));
    }

    #[test]
    fn test_whitespace_values_trimmed() {
        let body = b"--B\r\nContent-Disposition: form-data; name=\"acl\"\r\n\r\n  public-read  \r\n--B\r\nContent-Disposition: form-data; name=\"file\"; filename=\"f\"\r\n\r\nx\r\n--B--\r\n";
        let form = run(parse_post_form(&body[..], "multipart/form-data; boundary=B")).unwrap();
        assert_eq!(form.params["acl"], "public-read");
    }

    #[test]
    fn test_preserves_amz_meta_fields() {
        let body = b"--B\r\nContent-Disposition: form-data; name=\"x-amz-meta-color\"\r\n\r\nblue\r\n--B\r\nContent-Disposition: form-data; name=\"success_action_status\"\r\n\r\n201\r\n--B\r\nContent-Disposition: form-data; name=\"file\"; filename=\"f\"\r\n\r\nx\r\n--B--\r\n";
        let form = run(parse_post_form(&body[..], "multipart/form-data; boundary=B")).unwrap();
        assert_eq!(form.params["x-amz-meta-color"], "blue");
        assert_eq!(form.params["success_action_status"], "201");
    }

    #[test]
    fn test_binary_payload_with_embedded_newlines() {
        let payload = b"line1\r\nline2\nline3\r\n";
        let mut body = Vec::new();
        body.extend_from_slice(
            b"--B\r\nContent-Disposition: form-data; name=\"file\"; filename=\"f\"\r\n\r\n",
        );
        body.extend_from_slice(payload);
        body.extend_from_slice(b"\r\n--B--\r\n");
        let form = run(parse_post_form(&body[..], "multipart/form-data; boundary=B")).unwrap();
        assert_eq!(form.file.as_ref(), payload);
    }

    #[test]
    fn test_payload_larger_than_chunk_window() {
        // force multiple buffer refills through the boundary scanner
        let payload = vec![0x42u8; MAX_CHUNK_SIZE * 2 + 1234];
        let mut body = Vec::new();
        body.extend_from_slice(
            b"--frontier\r\nContent-Disposition: form-data; name=\"file\"; filename=\"big\"\r\n\r\n",
        );
        body.extend_from_slice(&payload);
        body.extend_from_slice(b"\r\n--frontier--\r\n");
        let form = run(parse_post_form(
            &body[..],
            "multipart/form-data; boundary=frontier",
        ))
        .unwrap();
        assert_eq!(form.file.len(), payload.len());
        assert_eq!(form.file.as_ref(), &payload[..]);
    }

    #[test]
    fn test_truncated_stream_errors() {
        let body = b"--B\r\nContent-Disposition: form-data; name=\"file\"; filename=\"f\"\r\n\r\nDATA WITH NO TERMIN";
        let err = run(parse_post_form(&body[..], "multipart/form-data; boundary=B")).unwrap_err();
        assert!(matches!(err, FormError::Malformed(_)));
    }
}
