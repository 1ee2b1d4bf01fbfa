use crate::classifier::split_expressions;
use crate::models::{AliasAsset, AliasMapping};

// ---------------------------------------------------------------------------
// Merchant alias resolution
// ---------------------------------------------------------------------------

/// First alias-match rule whose keyword list hits the key description.
/// Assets are evaluated in the order given; order is the only precedence.
pub fn match_asset<'a>(key_desc: &str, assets: &'a [AliasAsset]) -> Option<&'a AliasAsset> {
    assets.iter().find(|asset| {
        split_expressions(&asset.keywords)
            .iter()
            .any(|k| key_desc.contains(k.as_str()))
    })
}

/// What one transaction's alias lookup decided.
#[derive(Debug, Clone)]
pub struct AliasResolution {
    pub alias_desc: Option<String>,
    /// Dictionary row to upsert. Written for every transaction, alias or
    /// not, so the dictionary learns each key description it sees.
    pub mapping: AliasMapping,
    /// The resolved alias is new for this key description; existing ledger
    /// rows sharing it should be updated too.
    pub propagate: bool,
}

/// Resolve the display alias for one transaction: an exact dictionary hit
/// wins, otherwise the alias-match rules run in order, otherwise the alias
/// stays unset for manual assignment later.
pub fn resolve(
    key_desc: &str,
    simple_desc: &str,
    existing: Option<&AliasMapping>,
    assets: &[AliasAsset],
) -> AliasResolution {
    let existing_alias = existing.and_then(|m| m.alias_desc.clone());

    let alias_desc = existing_alias
        .clone()
        .or_else(|| match_asset(key_desc, assets).map(|a| a.alias_desc.clone()));

    let propagate = alias_desc.is_some() && alias_desc != existing_alias;

    AliasResolution {
        alias_desc: alias_desc.clone(),
        mapping: AliasMapping {
            key_desc: key_desc.to_string(),
            simple_desc: simple_desc.to_string(),
            alias_desc,
        },
        propagate,
    }
}
