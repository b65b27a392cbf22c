//! Byte-encoding detection with a two-label canonical output.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use chardetng::EncodingDetector;

use crate::error::ParseError;

/// How many leading bytes feed the statistical detector.
const DETECT_SAMPLE_BYTES: usize = 64 * 1024;

/// Canonical encodings the pipeline reads. Everything the detector
/// reports collapses onto one of these two labels; ambiguity is never an
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEncoding {
    Utf8,
    Windows1252,
}

impl SourceEncoding {
    pub fn label(self) -> &'static str {
        match self {
            SourceEncoding::Utf8 => "utf8",
            SourceEncoding::Windows1252 => "windows-1252",
        }
    }

    pub(crate) fn encoding(self) -> &'static encoding_rs::Encoding {
        match self {
            SourceEncoding::Utf8 => encoding_rs::UTF_8,
            SourceEncoding::Windows1252 => encoding_rs::WINDOWS_1252,
        }
    }
}

/// Map a detector label onto the canonical pair. Single-byte Latin
/// variants all read correctly as windows-1252; unknown labels default to
/// utf8.
pub fn canonicalize_label(label: &str) -> SourceEncoding {
    match label.to_ascii_lowercase().trim() {
        "ascii" | "us-ascii" | "utf-8" | "utf8" => SourceEncoding::Utf8,
        "iso-8859-1" | "iso-8859-15" | "latin-1" | "latin1" | "cp1250" | "cp1252"
        | "windows-1250" | "windows-1252" => SourceEncoding::Windows1252,
        _ => SourceEncoding::Utf8,
    }
}

/// Detect the encoding of a text file. Fails only when the file cannot be
/// read.
pub fn detect_encoding(path: &Path) -> Result<SourceEncoding, ParseError> {
    let mut file = File::open(path).map_err(|source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut sample = vec![0u8; DETECT_SAMPLE_BYTES];
    let read = file.read(&mut sample).map_err(|source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    sample.truncate(read);
    Ok(detect_encoding_of(&sample))
}

pub fn detect_encoding_of(sample: &[u8]) -> SourceEncoding {
    // Valid UTF-8 (which includes pure ASCII) short-circuits the detector;
    // chardetng reports windows-1252 for ASCII-only input, but the
    // canonical label for it is utf8.
    match std::str::from_utf8(sample) {
        Ok(_) => return SourceEncoding::Utf8,
        // A multi-byte sequence cut off at the sample boundary.
        Err(err) if err.error_len().is_none() => return SourceEncoding::Utf8,
        Err(_) => {}
    }

    let mut detector = EncodingDetector::new();
    detector.feed(sample, true);
    let guessed = detector.guess(None, true);
    canonicalize_label(guessed.name())
}
