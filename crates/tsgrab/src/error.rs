use std::{fmt, path::PathBuf};

use aes::cipher::block_padding::UnpadError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GrabError {
    #[error("HTTP error: {0}")]
    HttpStatus(reqwest::StatusCode),

    #[error("Invalid m3u8 file: {0}")]
    Manifest(String),

    #[error("Failed to fetch key from {url}: {reason}")]
    KeyFetch { url: String, reason: String },

    #[error("Unsupported cipher method: {0}")]
    UnsupportedCipher(String),

    #[error("Invalid AES-128 key: expected 16 bytes, got {0}")]
    InvalidKey(usize),

    #[error("Failed to decrypt segment {index}: {reason}")]
    Decrypt { index: usize, reason: String },

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Pkcs7 unpad error")]
    Unpad(#[from] UnpadError),

    #[error("Download incomplete ({completion:.1}%). Missing {} segments.{}", .missing.len(), MissingPreview(.missing))]
    IncompleteDownload { completion: f64, missing: Vec<usize> },

    #[error("Output file {path} is {reason}")]
    OutputIntegrity { path: PathBuf, reason: &'static str },

    #[error("Output writer stopped before segment {0} could be queued")]
    WriterClosed(usize),

    #[error("None of the {0} configured proxies could fetch the first segment")]
    ProxyExhaustion(usize),

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error(transparent)]
    HexDecodeError(#[from] hex::FromHexError),

    #[error(transparent)]
    RequestError(#[from] reqwest::Error),

    #[error(transparent)]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    JoinError(#[from] tokio::task::JoinError),
}

pub type GrabResult<T> = Result<T, GrabError>;

/// Only the first 10 missing indices are shown in messages.
const MISSING_PREVIEW_LIMIT: usize = 10;

struct MissingPreview<'a>(&'a Vec<usize>);

impl fmt::Display for MissingPreview<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return Ok(());
        }

        let shown: Vec<String> = self
            .0
            .iter()
            .take(MISSING_PREVIEW_LIMIT)
            .map(usize::to_string)
            .collect();
        write!(f, " Missing segments: [{}", shown.join(", "))?;
        if self.0.len() > MISSING_PREVIEW_LIMIT {
            write!(f, ", ... {} more", self.0.len() - MISSING_PREVIEW_LIMIT)?;
        }
        write!(f, "]")
    }
}
