//! Upload validation and naming.
//!
//! Everything here runs before the first ledger or store write, so a
//! rejected upload leaves no trace. Client filenames are only used for the
//! display name and the `original_filename` column; object filenames are
//! derived from a sanitised stem so a hostile name cannot escape the
//! catalog's key prefix.

use crate::error::CatalogError;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Declared content types accepted for an upload.
const ACCEPTED_CONTENT_TYPES: &[&str] = &["application/pdf", "application/octet-stream"];

static UNSAFE_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]+").unwrap());
static REPEATED_DASH: Lazy<Regex> = Lazy::new(|| Regex::new(r"-{2,}").unwrap());

/// Reject uploads that must not reach the pipeline.
pub fn validate_upload(
    bytes: &[u8],
    filename: &str,
    content_type: Option<&str>,
    max_bytes: usize,
) -> Result<(), CatalogError> {
    if bytes.is_empty() {
        return Err(CatalogError::Validation("the uploaded file is empty".into()));
    }

    if bytes.len() > max_bytes {
        return Err(CatalogError::Validation(format!(
            "file is {} bytes; the limit is {} bytes",
            bytes.len(),
            max_bytes
        )));
    }

    if !has_pdf_extension(filename) {
        return Err(CatalogError::Validation(format!(
            "'{}' does not have a .pdf extension",
            filename
        )));
    }

    if let Some(ct) = content_type {
        let essence = ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        if !essence.is_empty() && !ACCEPTED_CONTENT_TYPES.contains(&essence.as_str()) {
            return Err(CatalogError::Validation(format!(
                "content type '{}' is not a PDF",
                essence
            )));
        }
    }

    // Verify PDF magic bytes
    if bytes.len() < 4 || &bytes[..4] != b"%PDF" {
        let mut magic = [0u8; 4];
        let n = bytes.len().min(4);
        magic[..n].copy_from_slice(&bytes[..n]);
        return Err(CatalogError::Validation(format!(
            "file is not a valid PDF (first bytes: {:?})",
            magic
        )));
    }

    debug!("Upload '{}' passed validation ({} bytes)", filename, bytes.len());
    Ok(())
}

fn has_pdf_extension(filename: &str) -> bool {
    base_name(filename)
        .rsplit_once('.')
        .map(|(_, ext)| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

/// Last path component of a client filename (both separators).
fn base_name(filename: &str) -> &str {
    filename
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or(filename)
        .trim()
}

/// Display name for a catalog: the filename without directories or extension.
pub fn display_name(filename: &str) -> String {
    let base = base_name(filename);
    let stem = match base.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => base,
    };
    if stem.is_empty() {
        "catalog".to_string()
    } else {
        stem.to_string()
    }
}

/// Object-safe stem: ASCII letters, digits, `.`, `_` and `-` only.
pub fn sanitize_stem(filename: &str) -> String {
    let stem = display_name(filename);
    let cleaned = UNSAFE_CHARS.replace_all(&stem, "-");
    let cleaned = REPEATED_DASH.replace_all(&cleaned, "-");
    let cleaned = cleaned.trim_matches(|c: char| c == '-' || c == '.');
    if cleaned.is_empty() {
        "document".to_string()
    } else {
        cleaned.chars().take(120).collect()
    }
}

/// Filename the original PDF is stored under.
pub fn original_object_filename(filename: &str) -> String {
    format!("{}.pdf", sanitize_stem(filename))
}

/// Lowercase hex MD5 of the stored bytes.
pub fn checksum(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}
