//! PDF text-layer extraction via lopdf.
//!
//! Only embedded text is read; scanned pages without a text layer come back
//! empty.

use std::path::Path;

use tracing::debug;

use crate::error::{FilechatError, Result};

/// Extract the text of every page, pages separated by a blank line.
pub fn extract_text(path: &Path) -> Result<String> {
    let document = lopdf::Document::load(path).map_err(|e| {
        FilechatError::Documents(format!("Failed to open PDF {}: {e}", path.display()))
    })?;

    let mut collected = Vec::new();
    for page_number in document.get_pages().keys() {
        match document.extract_text(&[*page_number]) {
            Ok(text) if !text.trim().is_empty() => collected.push(text),
            Ok(_) => debug!(page = *page_number, path = %path.display(), "PDF page has no text layer"),
            Err(e) => debug!(page = *page_number, error = %e, "Failed to extract PDF page text"),
        }
    }
    Ok(collected.join("\n\n"))
}
