use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Identity normalization used for matching and deduplication: lowercase,
/// diacritics stripped, whitespace collapsed. `"Bäckerei  Müller"` becomes
/// `"backerei muller"`.
pub fn normalize_desc(text: &str) -> String {
    let stripped: String = text
        .to_lowercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect();
    collapse_ws(&stripped)
}

/// Header-token normalization: trim, strip the BOM, lowercase, and fold
/// umlauts to their digraph spellings so `"Begünstigter"` and
/// `"Beguenstigter"` resolve to the same column.
pub fn fold_header(text: &str) -> String {
    let trimmed = text.trim().trim_start_matches('\u{feff}');
    let mut folded = String::with_capacity(trimmed.len());
    for c in trimmed.to_lowercase().chars() {
        match c {
            'ä' => folded.push_str("ae"),
            'ö' => folded.push_str("oe"),
            'ü' => folded.push_str("ue"),
            'ß' => folded.push_str("ss"),
            _ => folded.push(c),
        }
    }
    collapse_ws(&folded)
}

pub fn collapse_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Last 4 characters of an account identifier, used for display labels like
/// `"Sparkasse (1234)"`.
pub fn last4(identifier: &str) -> String {
    let trimmed = identifier.trim();
    let chars: Vec<char> = trimmed.chars().collect();
    if chars.len() <= 4 {
        trimmed.to_string()
    } else {
        chars[chars.len() - 4..].iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_desc_strips_diacritics() {
        assert_eq!(normalize_desc("Bäckerei Müller"), "backerei muller");
        assert_eq!(normalize_desc("São Paulo  Café"), "sao paulo cafe");
    }

    #[test]
    fn test_normalize_desc_collapses_whitespace() {
        assert_eq!(normalize_desc("  REWE   Markt\tGmbH "), "rewe markt gmbh");
    }

    #[test]
    fn test_normalize_desc_is_idempotent() {
        let once = normalize_desc("Begünstigter / Zahlungspflichtiger");
        assert_eq!(normalize_desc(&once), once);
    }

    #[test]
    fn test_fold_header_maps_umlauts_to_digraphs() {
        assert_eq!(fold_header("Begünstigter/Zahlungspflichtiger"), "beguenstigter/zahlungspflichtiger");
        assert_eq!(fold_header("Währung"), "waehrung");
        assert_eq!(fold_header("Buchungstag"), "buchungstag");
    }

    #[test]
    fn test_fold_header_strips_bom_and_trims() {
        assert_eq!(fold_header("\u{feff}Auftragskonto "), "auftragskonto");
    }

    #[test]
    fn test_last4() {
        assert_eq!(last4("DE89370400440532013000"), "3000");
        assert_eq!(last4("123"), "123");
        assert_eq!(last4(" -71002 "), "1002");
    }
}
