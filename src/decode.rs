use encoding_rs::WINDOWS_1252;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, ImportError, Result};

/// Above this share of U+FFFD replacement characters a decode attempt is
/// treated as mojibake and rejected.
pub const REPLACEMENT_RATIO_LIMIT: f64 = 0.005;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Encoding {
    Utf8,
    Windows1252,
    Utf8Lossy,
}

impl Encoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Utf8 => "utf-8",
            Self::Windows1252 => "windows-1252",
            Self::Utf8Lossy => "utf-8-lossy",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Decoded {
    pub text: String,
    pub encoding: Encoding,
    pub replacement_ratio: f64,
    /// True when strict UTF-8 rejected the bytes outright.
    pub had_decode_failure: bool,
}

fn replacement_ratio(text: &str) -> f64 {
    let total = text.chars().count().max(1);
    let replacements = text.chars().filter(|c| *c == '\u{fffd}').count();
    replacements as f64 / total as f64
}

fn strip_bom(text: &str) -> &str {
    text.strip_prefix('\u{feff}').unwrap_or(text)
}

fn accept(text: String, encoding: Encoding, ratio: f64, had_decode_failure: bool) -> Decoded {
    Decoded {
        text: strip_bom(&text).to_string(),
        encoding,
        replacement_ratio: ratio,
        had_decode_failure,
    }
}

fn detect_failed() -> ImportError {
    ImportError::fatal(
        ErrorCode::EncodingDetectFailed,
        "text contains replacement characters above the limit under every candidate encoding",
    )
}

/// Decode raw bytes into text, never returning unflagged mojibake.
///
/// Strict UTF-8 is tried first. Bytes that are not UTF-8 fall back to
/// Windows-1252 (the single-byte Western codepage), then to lossy UTF-8 as a
/// last resort. Valid UTF-8 that already carries replacement characters above
/// the ratio limit was corrupted before export; reinterpreting those bytes in
/// another codepage would only manufacture garbage, so decoding fails with
/// `ENCODING_DETECT_FAILED` instead. A Windows-1252 hint skips the UTF-8
/// attempt but stays subject to the same ratio check.
pub fn decode(bytes: &[u8], hint: Option<Encoding>, ratio_limit: f64) -> Result<Decoded> {
    if hint == Some(Encoding::Windows1252) {
        let (cow, _, _) = WINDOWS_1252.decode(bytes);
        let ratio = replacement_ratio(&cow);
        if ratio <= ratio_limit {
            return Ok(accept(cow.into_owned(), Encoding::Windows1252, ratio, false));
        }
        return Err(detect_failed());
    }

    match std::str::from_utf8(bytes) {
        Ok(text) => {
            let ratio = replacement_ratio(text);
            if ratio <= ratio_limit {
                Ok(accept(text.to_string(), Encoding::Utf8, ratio, false))
            } else {
                Err(detect_failed())
            }
        }
        Err(_) => {
            let (cow, _, _) = WINDOWS_1252.decode(bytes);
            let ratio = replacement_ratio(&cow);
            if ratio <= ratio_limit {
                return Ok(accept(cow.into_owned(), Encoding::Windows1252, ratio, true));
            }
            let lossy = String::from_utf8_lossy(bytes).into_owned();
            let ratio = replacement_ratio(&lossy);
            if ratio <= ratio_limit {
                return Ok(accept(lossy, Encoding::Utf8Lossy, ratio, true));
            }
            Err(detect_failed())
        }
    }
}
