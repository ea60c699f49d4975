use crate::error::{RagError, Result};
use log::{debug, info, warn};
use mime_guess::from_path;
use pdf_extract::extract_text;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tokio::task;

/// The knowledge base: a single document loaded once per index build
#[derive(Debug, Clone)]
pub struct Corpus {
    /// The actual text content of the document
    pub content: String,
    /// The document's file name (used as document ID)
    pub document_id: String,
    /// The document's MIME type
    pub mime_type: String,
    /// Hex SHA-256 of `content`, stored with the index to spot stale indexes
    pub content_hash: String,
}

impl Corpus {
    /// Load the corpus from a file path
    pub fn from_file<P: AsRef<Path>>(file_path: P) -> Result<Self> {
        let path = file_path.as_ref();
        if !path.exists() {
            return Err(RagError::CorpusNotFound(path.to_path_buf()));
        }

        let document_id = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("corpus")
            .to_string();

        let mime_type = from_path(path).first_or_octet_stream().to_string();
        debug!("Detected MIME type: {}", mime_type);

        let content = read_corpus_content(path, &mime_type)?;
        let content_hash = content_hash(&content);

        Ok(Corpus {
            content,
            document_id,
            mime_type,
            content_hash,
        })
    }

    /// Load the corpus on the blocking pool; file reads and PDF extraction
    /// must not stall the async workers
    pub async fn load(path: &Path) -> Result<Self> {
        let owned = path.to_path_buf();
        task::spawn_blocking(move || Corpus::from_file(&owned))
            .await
            .map_err(|e| RagError::CorpusRead {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
    }

    /// Build a corpus from in-memory text
    pub fn from_text(document_id: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        let content_hash = content_hash(&content);
        Corpus {
            content,
            document_id: document_id.into(),
            mime_type: "text/plain".to_string(),
            content_hash,
        }
    }
}

/// Hex SHA-256 of the corpus text
pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Hash the corpus file at `path` without keeping its text around
pub async fn hash_file<P: AsRef<Path>>(path: P) -> Result<String> {
    Corpus::load(path.as_ref())
        .await
        .map(|corpus| corpus.content_hash)
}

fn read_corpus_content(path: &Path, mime_type: &str) -> Result<String> {
    match mime_type {
        mime if mime.starts_with("application/pdf") => {
            info!("Processing PDF corpus: {}", path.display());
            let content = extract_text(path).map_err(|e| RagError::CorpusRead {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

            // PDF extraction can sometimes include excessive whitespace
            let cleaned_content = normalize_whitespace(&content);
            if cleaned_content.is_empty() {
                warn!("Extracted PDF content is empty or contains only whitespace");
            }
            Ok(cleaned_content)
        }

        // Extension-less files are read as plain text
        mime if mime.starts_with("text/") || path.extension().is_none() => {
            info!("Processing text corpus: {}", path.display());
            fs::read_to_string(path).map_err(|e| match e.kind() {
                ErrorKind::NotFound => RagError::CorpusNotFound(path.to_path_buf()),
                _ => RagError::CorpusRead {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                },
            })
        }

        _ => Err(RagError::UnsupportedCorpus(mime_type.to_string())),
    }
}

/// Normalize whitespace in text (remove multiple consecutive spaces, newlines, etc.)
fn normalize_whitespace(text: &str) -> String {
    let result = text.replace('\r', "");

    let mut prev_char = ' ';
    let mut newline_count = 0;
    let mut normalized = String::with_capacity(result.len());

    for c in result.chars() {
        if c == '\n' {
            newline_count += 1;
            continue;
        }
        if newline_count > 0 {
            // At most one blank line survives, so paragraphs stay splittable
            normalized.push_str(if newline_count >= 2 { "\n\n" } else { "\n" });
            newline_count = 0;
        }
        if !(c == ' ' && prev_char == ' ') {
            normalized.push(c);
        }
        prev_char = c;
    }

    normalized.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_normalize_whitespace() {
        let text = "This  has   multiple    spaces.\n\n\nAnd multiple newlines.\r\nAnd Windows line endings.";
        let expected =
            "This has multiple spaces.\n\nAnd multiple newlines.\nAnd Windows line endings.";
        assert_eq!(normalize_whitespace(text), expected);
    }

    #[test]
    fn test_loads_text_corpus() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sharebite_info.txt");
        let mut file = fs::File::create(&path).unwrap();
        write!(file, "ShareBite helps donate surplus food to shelters.").unwrap();

        let corpus = Corpus::from_file(&path).unwrap();
        assert_eq!(corpus.document_id, "sharebite_info.txt");
        assert_eq!(corpus.mime_type, "text/plain");
        assert_eq!(corpus.content, "ShareBite helps donate surplus food to shelters.");
        assert_eq!(corpus.content_hash, content_hash(&corpus.content));
    }

    #[test]
    fn test_missing_corpus_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = Corpus::from_file(dir.path().join("missing.txt")).unwrap_err();
        assert!(matches!(err, RagError::CorpusNotFound(_)));
    }

    #[test]
    fn test_unsupported_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logo.png");
        fs::write(&path, [0u8, 1, 2]).unwrap();
        let err = Corpus::from_file(&path).unwrap_err();
        assert_eq!(err.code(), "unsupported_corpus");
    }

    #[tokio::test]
    async fn test_load_matches_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sharebite_info.txt");
        fs::write(&path, "Volunteer drivers pick up donations.").unwrap();

        let loaded = Corpus::load(&path).await.unwrap();
        assert_eq!(loaded.content, "Volunteer drivers pick up donations.");
        assert_eq!(hash_file(&path).await.unwrap(), loaded.content_hash);

        let err = Corpus::load(&dir.path().join("missing.txt")).await.unwrap_err();
        assert_eq!(err.code(), "corpus_not_found");
    }

    #[test]
    fn test_hash_changes_with_content() {
        let a = Corpus::from_text("a.txt", "ShareBite helps donate surplus food.");
        let b = Corpus::from_text("a.txt", "ShareBite helps donate surplus meals.");
        assert_ne!(a.content_hash, b.content_hash);
        assert_eq!(a.content_hash.len(), 64);
    }
}
