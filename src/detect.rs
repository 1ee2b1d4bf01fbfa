use serde::{Deserialize, Serialize};

use crate::models::Source;

/// How many leading non-blank lines are inspected for a format marker.
const DETECT_WINDOW: usize = 5;

/// A recognized bank export dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Format {
    Sparkasse,
    Amex,
    MilesAndMore,
}

impl Format {
    pub const ALL: [Format; 3] = [Format::Sparkasse, Format::Amex, Format::MilesAndMore];

    /// The header token that identifies this dialect.
    pub fn token(&self) -> &'static str {
        match self {
            Self::Sparkasse => "auftragskonto",
            Self::Amex => "karteninhaber",
            Self::MilesAndMore => "authorised on",
        }
    }

    pub fn delimiter(&self) -> u8 {
        match self {
            Self::Sparkasse | Self::MilesAndMore => b';',
            Self::Amex => b',',
        }
    }

    pub fn source(&self) -> Source {
        match self {
            Self::Sparkasse => Source::Sparkasse,
            Self::Amex => Source::Amex,
            Self::MilesAndMore => Source::MilesAndMore,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Sparkasse => "Sparkasse",
            Self::Amex => "Amex",
            Self::MilesAndMore => "Miles & More",
        }
    }

    pub fn from_key(key: &str) -> Option<Format> {
        match key.to_lowercase().as_str() {
            "sparkasse" => Some(Self::Sparkasse),
            "amex" => Some(Self::Amex),
            "mm" | "milesandmore" | "miles-and-more" => Some(Self::MilesAndMore),
            _ => None,
        }
    }
}

/// Detect the dialect from decoded file text.
///
/// Scans the first few non-blank lines for a case-insensitive marker token.
/// Files may carry preamble before the header (Miles & More puts a card info
/// line first), which is why more than one line is considered.
pub fn detect_format(text: &str) -> Option<Format> {
    for line in text.lines().filter(|l| !l.trim().is_empty()).take(DETECT_WINDOW) {
        let lower = line.to_lowercase();
        for format in Format::ALL {
            if lower.contains(format.token()) {
                return Some(format);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_sparkasse() {
        let text = "Auftragskonto;Buchungstag;Valutadatum;Buchungstext;Verwendungszweck\n";
        assert_eq!(detect_format(text), Some(Format::Sparkasse));
    }

    #[test]
    fn test_detects_amex() {
        let text = "Datum,Beschreibung,Karteninhaber,Konto #,Betrag\n";
        assert_eq!(detect_format(text), Some(Format::Amex));
    }

    #[test]
    fn test_detects_miles_and_more_past_card_info_line() {
        let text = "Miles & More Gold Credit Card 1234 XXXX;;;\n\
                    Authorised on;Processed on;Amount;Currency;Description\n";
        assert_eq!(detect_format(text), Some(Format::MilesAndMore));
    }

    #[test]
    fn test_blank_lines_do_not_consume_the_window() {
        let text = "\n\n\n\n\nAuftragskonto;Buchungstag\n";
        assert_eq!(detect_format(text), Some(Format::Sparkasse));
    }

    #[test]
    fn test_marker_past_window_is_not_found() {
        let mut text = String::new();
        for i in 0..6 {
            text.push_str(&format!("preamble line {i}\n"));
        }
        text.push_str("Auftragskonto;Buchungstag\n");
        assert_eq!(detect_format(&text), None);
    }

    #[test]
    fn test_detection_is_case_insensitive() {
        assert_eq!(detect_format("AUFTRAGSKONTO;BETRAG\n"), Some(Format::Sparkasse));
        assert_eq!(detect_format("datum,beschreibung,KARTENINHABER\n"), Some(Format::Amex));
    }

    #[test]
    fn test_unrecognized_header_yields_none() {
        assert_eq!(detect_format("Date,Payee,Amount\n"), None);
    }

    #[test]
    fn test_from_key_round_trips_cli_names() {
        assert_eq!(Format::from_key("sparkasse"), Some(Format::Sparkasse));
        assert_eq!(Format::from_key("AMEX"), Some(Format::Amex));
        assert_eq!(Format::from_key("mm"), Some(Format::MilesAndMore));
        assert_eq!(Format::from_key("qif"), None);
    }
}
