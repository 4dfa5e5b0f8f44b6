//! Form and multipart body decoding.
//!
//! Two request encodings resolve into one [`FormData`] view:
//! `application/x-www-form-urlencoded` bodies become text fields, and
//! `multipart/form-data` bodies become text fields plus [`FilePart`]s
//! spooled into the owning application's temp directory.

use crate::error::HandlerError;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One uploaded file, spooled to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    /// Client-supplied file name.
    pub filename: String,
    /// Content type of the part, when declared.
    pub content_type: Option<String>,
    /// Spool location inside the application temp directory.
    pub path: PathBuf,
    /// Size of the spooled content in bytes.
    pub size: u64,
}

/// A decoded form field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormField {
    Text(String),
    File(FilePart),
}

/// Decoded form or multipart data, field order preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormData {
    fields: Vec<(String, FormField)>,
}

impl FormData {
    /// Field by name; last occurrence wins for duplicates.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FormField> {
        self.fields
            .iter()
            .rfind(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    /// Text value of a field, `None` for missing or file fields.
    #[must_use]
    pub fn text(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(FormField::Text(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    /// File part of a field, `None` for missing or text fields.
    #[must_use]
    pub fn file(&self, name: &str) -> Option<&FilePart> {
        match self.get(name) {
            Some(FormField::File(part)) => Some(part),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FormField)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Decode a request body according to its content type.
pub(crate) fn parse_form(
    content_type: &str,
    body: &[u8],
    tmp_dir: &Path,
) -> Result<FormData, HandlerError> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    match mime.as_str() {
        "application/x-www-form-urlencoded" => Ok(parse_urlencoded(body)),
        "multipart/form-data" => {
            let boundary = boundary_param(content_type).ok_or_else(|| {
                HandlerError::failure("multipart body without a boundary parameter")
            })?;
            parse_multipart(body, &boundary, tmp_dir)
        }
        other => Err(HandlerError::failure(format!(
            "unsupported form content type '{other}'"
        ))),
    }
}

fn parse_urlencoded(body: &[u8]) -> FormData {
    let fields = url::form_urlencoded::parse(body)
        .map(|(k, v)| (k.into_owned(), FormField::Text(v.into_owned())))
        .collect();
    FormData { fields }
}

fn boundary_param(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.trim().split_once('=')?;
        if key.eq_ignore_ascii_case("boundary") {
            Some(value.trim_matches('"').to_string())
        } else {
            None
        }
    })
}

fn parse_multipart(body: &[u8], boundary: &str, tmp_dir: &Path) -> Result<FormData, HandlerError> {
    let mut fields = Vec::new();
    for raw_part in split_parts(body, boundary) {
        let Some((header_block, content)) = split_headers(raw_part) else {
            continue;
        };
        let headers = parse_part_headers(header_block);
        let Some(disposition) = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-disposition"))
            .map(|(_, v)| v.as_str())
        else {
            continue;
        };
        let Some(name) = disposition_param(disposition, "name") else {
            continue;
        };
        let content_type = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            .map(|(_, v)| v.clone());
        if let Some(filename) = disposition_param(disposition, "filename") {
            let part = spool_file(&filename, content_type, content, tmp_dir)?;
            debug!(field = %name, filename = %part.filename, size = part.size, "multipart file spooled");
            fields.push((name, FormField::File(part)));
        } else {
            let text = String::from_utf8_lossy(content).into_owned();
            fields.push((name, FormField::Text(text)));
        }
    }
    Ok(FormData { fields })
}

/// Slice the body into the content of each multipart part, excluding the
/// delimiters and the closing `--` marker. A delimiter only counts when the
/// CRLF that ends the previous line precedes it, so part content carrying
/// the boundary bytes mid-line stays intact.
fn split_parts<'a>(body: &'a [u8], boundary: &str) -> Vec<&'a [u8]> {
    let opening = format!("--{boundary}");
    let delimiter = format!("\r\n--{boundary}");
    let mut parts = Vec::new();
    // The first delimiter may open the body directly; otherwise it follows
    // a preamble and the preamble's closing CRLF.
    let mut rest = if body.starts_with(opening.as_bytes()) {
        &body[opening.len()..]
    } else {
        match find(body, delimiter.as_bytes()) {
            Some(start) => &body[start + delimiter.len()..],
            None => return parts,
        }
    };
    loop {
        // A delimiter followed by "--" is the terminator.
        if rest.starts_with(b"--") {
            break;
        }
        rest = strip_crlf_prefix(rest);
        match find(rest, delimiter.as_bytes()) {
            Some(end) => {
                parts.push(&rest[..end]);
                rest = &rest[end + delimiter.len()..];
            }
            None => break,
        }
    }
    parts
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn strip_crlf_prefix(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(b"\r\n").unwrap_or(bytes)
}

fn split_headers(part: &[u8]) -> Option<(&[u8], &[u8])> {
    let pos = find(part, b"\r\n\r\n")?;
    Some((&part[..pos], &part[pos + 4..]))
}

fn parse_part_headers(block: &[u8]) -> Vec<(String, String)> {
    String::from_utf8_lossy(block)
        .lines()
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

fn disposition_param(disposition: &str, key: &str) -> Option<String> {
    disposition.split(';').skip(1).find_map(|param| {
        let (k, v) = param.trim().split_once('=')?;
        if k.eq_ignore_ascii_case(key) {
            Some(v.trim_matches('"').to_string())
        } else {
            None
        }
    })
}

fn spool_file(
    filename: &str,
    content_type: Option<String>,
    content: &[u8],
    tmp_dir: &Path,
) -> Result<FilePart, HandlerError> {
    let spool_name = format!("upload-{}", ulid::Ulid::new());
    let path = tmp_dir.join(spool_name);
    fs::write(&path, content)
        .map_err(|e| HandlerError::failure(format!("upload spool failed: {e}")))?;
    Ok(FilePart {
        filename: filename.to_string(),
        content_type,
        path,
        size: content.len() as u64,
    })
}
