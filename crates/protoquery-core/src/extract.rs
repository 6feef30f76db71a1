//! Plain-text document extraction.
//!
//! PDF and DOCX parsing live outside this workspace; feed their text output
//! through here, or implement [`Extractor`] for another source.

use std::fs;
use std::path::Path;

use crate::error::CollaboratorError;
use crate::traits::Extractor;

const TEXT_EXTENSIONS: &[&str] = &["txt", "text", "md", "markdown"];

#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

impl PlainTextExtractor {
    pub fn supports(path: &Path) -> bool {
        path.extension()
            .and_then(|s| s.to_str())
            .is_some_and(|ext| TEXT_EXTENSIONS.iter().any(|t| t.eq_ignore_ascii_case(ext)))
    }
}

impl Extractor for PlainTextExtractor {
    fn extract(&self, path: &Path) -> Result<String, CollaboratorError> {
        if !Self::supports(path) {
            return Err(CollaboratorError::Failed(format!(
                "unsupported format for {}; expected one of {}",
                path.display(),
                TEXT_EXTENSIONS.join(", ")
            )));
        }
        match fs::read_to_string(path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                let bytes = fs::read(path).map_err(|e| CollaboratorError::Failed(e.to_string()))?;
                Ok(String::from_utf8_lossy(&bytes).to_string())
            }
            Err(e) => Err(CollaboratorError::Failed(e.to_string())),
        }
    }
}
