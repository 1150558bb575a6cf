// Shortcut Catalog
// Canonical codes, categories, aliases and prefix families (e.g. `MOS:`).
// Patterns are compiled once here and shared read-only by every detector.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use tracing::info;

use crate::models::{Category, PrefixFamily, ShortcutEntry};

use super::error::CatalogError;

/// Built-in shortcuts: (code, category, extra aliases)
const BUILTIN_SHORTCUTS: &[(&str, Category, &[&str])] = &[
    // Policies
    ("WP:NPOV", Category::Policy, &["WP:WEIGHT", "WP:UNDUE", "WP:DUE", "WP:BALANCE"]),
    ("WP:V", Category::Policy, &["WP:CIRCULAR", "WP:VERIFY", "WP:VERIFIABLE"]),
    ("WP:OR", Category::Policy, &["WP:NOR"]),
    ("WP:NOT", Category::Policy, &["WP:NOTCENSORED", "WP:INDISCRIMINATE"]),
    ("WP:BLP", Category::Policy, &[]),
    ("WP:PA", Category::Policy, &["WP:NPA"]),
    ("WP:CIVIL", Category::Policy, &[]),
    ("WP:AGF", Category::Policy, &[]),
    ("WP:CON", Category::Policy, &["WP:CONSENSUS"]),
    ("WP:EW", Category::Policy, &["WP:3RR"]),
    // Guidelines
    ("WP:RS", Category::Guideline, &["WP:UGC", "WP:SPS", "WP:NEWSORG"]),
    ("WP:N", Category::Guideline, &["WP:GNG", "WP:NOTABLE"]),
    ("WP:CITE", Category::Guideline, &[]),
    ("WP:EL", Category::Guideline, &[]),
    ("WP:MOS", Category::Guideline, &[]),
    ("MOS:LABEL", Category::Guideline, &[]),
    ("MOS:CAPS", Category::Guideline, &[]),
    ("MOS:BOLD", Category::Guideline, &[]),
    ("WP:BRD", Category::Guideline, &[]),
    ("WP:FRINGE", Category::Guideline, &[]),
    ("WP:COI", Category::Guideline, &[]),
    // Essays
    ("WP:1AM", Category::Essay, &[]),
    ("WP:IAR", Category::Essay, &[]),
    ("WP:DEADLINE", Category::Essay, &[]),
    ("WP:COMMON", Category::Essay, &[]),
    ("WP:STICK", Category::Essay, &[]),
    ("WP:BEANS", Category::Essay, &[]),
    ("WP:SNOW", Category::Essay, &[]),
    ("WP:RANDY", Category::Essay, &[]),
    ("WP:DNFTT", Category::Essay, &[]),
];

const BUILTIN_FAMILIES: &[(&str, Category)] = &[("MOS:", Category::Guideline)];

/// Suffix accepted after a family prefix
const FAMILY_SUFFIX: &str = r"[A-Za-z0-9][A-Za-z0-9_]*";

/// On-disk catalog format
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CatalogFile {
    #[serde(default)]
    pub entries: Vec<ShortcutEntry>,
    #[serde(default)]
    pub families: Vec<PrefixFamily>,
}

/// A compiled surface form of one catalog entry
#[derive(Debug)]
pub struct AliasPattern {
    pub entry: usize,
    pub surface: String,
    pub regex: Regex,
}

#[derive(Debug)]
pub struct FamilyPattern {
    pub family: usize,
    pub regex: Regex,
}

/// Result of resolving a token against the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub code: String,
    pub category: Category,
    /// Resolved through a prefix family rather than a catalog entry
    pub via_family: bool,
}

#[derive(Debug)]
pub struct ShortcutCatalog {
    entries: Vec<ShortcutEntry>,
    families: Vec<PrefixFamily>,
    by_surface: HashMap<String, usize>,
    alias_patterns: Vec<AliasPattern>,
    family_patterns: Vec<FamilyPattern>,
}

impl ShortcutCatalog {
    /// Catalog of the policies, guidelines and essays most cited on talk pages
    pub fn builtin() -> Self {
        let entries = BUILTIN_SHORTCUTS
            .iter()
            .map(|(code, category, aliases)| ShortcutEntry {
                code: code.to_string(),
                category: *category,
                aliases: aliases.iter().map(|a| a.to_string()).collect(),
            })
            .collect();
        let families = BUILTIN_FAMILIES
            .iter()
            .map(|(prefix, category)| PrefixFamily {
                prefix: prefix.to_string(),
                category: *category,
            })
            .collect();

        Self::new(entries, families).expect("built-in catalog is invalid")
    }

    pub fn new(entries: Vec<ShortcutEntry>, families: Vec<PrefixFamily>) -> Result<Self, CatalogError> {
        let mut normalized: Vec<ShortcutEntry> = Vec::with_capacity(entries.len());
        let mut by_surface: HashMap<String, usize> = HashMap::new();

        for entry in entries {
            let code = entry.code.trim().to_string();
            if code.is_empty() {
                return Err(CatalogError::EmptyCode);
            }

            let mut aliases: BTreeSet<String> = BTreeSet::new();
            aliases.insert(code.clone());
            for alias in entry.aliases {
                let alias = alias.trim().to_string();
                if alias.is_empty() {
                    return Err(CatalogError::EmptyAlias { code });
                }
                aliases.insert(alias);
            }

            let index = normalized.len();
            for alias in &aliases {
                let key = alias.to_uppercase();
                if let Some(&other) = by_surface.get(&key) {
                    if other != index {
                        return Err(CatalogError::DuplicateAlias {
                            alias: alias.clone(),
                            first: normalized[other].code.clone(),
                            second: code,
                        });
                    }
                }
                by_surface.insert(key, index);
            }

            normalized.push(ShortcutEntry {
                code,
                category: entry.category,
                aliases,
            });
        }

        for family in &families {
            validate_family(&family.prefix)?;
        }

        let mut alias_patterns = Vec::new();
        for (index, entry) in normalized.iter().enumerate() {
            for surface in &entry.aliases {
                let regex = RegexBuilder::new(&regex::escape(surface))
                    .case_insensitive(true)
                    .build()
                    .map_err(|source| CatalogError::Pattern {
                        surface: surface.clone(),
                        source,
                    })?;
                alias_patterns.push(AliasPattern {
                    entry: index,
                    surface: surface.clone(),
                    regex,
                });
            }
        }

        let mut family_patterns = Vec::new();
        for (index, family) in families.iter().enumerate() {
            let pattern = format!("{}{}", regex::escape(&family.prefix), FAMILY_SUFFIX);
            let regex = RegexBuilder::new(&pattern)
                .case_insensitive(true)
                .build()
                .map_err(|source| CatalogError::Pattern {
                    surface: family.prefix.clone(),
                    source,
                })?;
            family_patterns.push(FamilyPattern { family: index, regex });
        }

        Ok(Self {
            entries: normalized,
            families,
            by_surface,
            alias_patterns,
            family_patterns,
        })
    }

    pub fn from_json_str(json: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_json::from_str(json)?;
        Self::new(file.entries, file.families)
    }

    /// Load a JSON catalog file
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let content = fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog = Self::from_json_str(&content)?;
        info!(
            "[CATALOG] Loaded {} entries, {} families from {}",
            catalog.entries.len(),
            catalog.families.len(),
            path.display()
        );
        Ok(catalog)
    }

    /// Entry for a canonical code or any of its aliases (case-insensitive)
    pub fn lookup(&self, code: &str) -> Option<&ShortcutEntry> {
        self.by_surface
            .get(&code.trim().to_uppercase())
            .map(|&i| &self.entries[i])
    }

    pub fn all_entries(&self) -> &[ShortcutEntry] {
        &self.entries
    }

    pub fn entries_for(&self, category: Category) -> Vec<&ShortcutEntry> {
        self.entries.iter().filter(|e| e.category == category).collect()
    }

    pub fn families(&self) -> &[PrefixFamily] {
        &self.families
    }

    pub fn families_for(&self, category: Category) -> Vec<&PrefixFamily> {
        self.families.iter().filter(|f| f.category == category).collect()
    }

    pub fn alias_patterns(&self) -> &[AliasPattern] {
        &self.alias_patterns
    }

    pub fn family_patterns(&self) -> &[FamilyPattern] {
        &self.family_patterns
    }

    pub fn entry(&self, index: usize) -> &ShortcutEntry {
        &self.entries[index]
    }

    pub fn family(&self, index: usize) -> &PrefixFamily {
        &self.families[index]
    }

    /// Resolve a token to its canonical code: aliases first, then prefix families
    pub fn classify(&self, token: &str) -> Option<Classified> {
        let token = token.trim();
        if let Some(entry) = self.lookup(token) {
            return Some(Classified {
                code: entry.code.clone(),
                category: entry.category,
                via_family: false,
            });
        }

        self.families.iter().find_map(|family| {
            let prefix_len = family.prefix.len();
            let head = token.get(..prefix_len)?;
            if !head.eq_ignore_ascii_case(&family.prefix) {
                return None;
            }
            let suffix = &token[prefix_len..];
            if !is_family_suffix(suffix) {
                return None;
            }
            Some(Classified {
                code: family_code(&family.prefix, suffix),
                category: family.category,
                via_family: true,
            })
        })
    }
}

/// Canonical code for a family match, e.g. `mos:caps` -> `MOS:CAPS`
pub fn family_code(prefix: &str, suffix: &str) -> String {
    format!("{}{}", prefix.to_uppercase(), suffix.to_uppercase())
}

fn is_family_suffix(suffix: &str) -> bool {
    let mut chars = suffix.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() => chars.all(|c| c.is_ascii_alphanumeric() || c == '_'),
        _ => false,
    }
}

fn validate_family(prefix: &str) -> Result<(), CatalogError> {
    let Some(name) = prefix.strip_suffix(':') else {
        return Err(CatalogError::InvalidFamily(prefix.to_string()));
    };
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(CatalogError::InvalidFamily(prefix.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_is_valid() {
        let catalog = ShortcutCatalog::builtin();
        assert!(catalog.all_entries().len() >= 30);
        assert_eq!(catalog.families().len(), 1);
        for category in Category::ALL {
            assert!(!catalog.entries_for(category).is_empty());
        }
    }

    #[test]
    fn test_lookup_by_code_and_alias() {
        let catalog = ShortcutCatalog::builtin();
        assert_eq!(catalog.lookup("WP:NPOV").unwrap().category, Category::Policy);
        assert_eq!(catalog.lookup("wp:undue").unwrap().code, "WP:NPOV");
        assert_eq!(catalog.lookup("WP:3RR").unwrap().code, "WP:EW");
        assert!(catalog.lookup("WP:NOPE").is_none());
    }

    #[test]
    fn test_classify_family() {
        let catalog = ShortcutCatalog::builtin();
        let c = catalog.classify("mos:Numeral").unwrap();
        assert_eq!(c.code, "MOS:NUMERAL");
        assert_eq!(c.category, Category::Guideline);
        assert!(c.via_family);

        // explicit entries win over the family
        let c = catalog.classify("MOS:CAPS").unwrap();
        assert!(!c.via_family);

        assert!(catalog.classify("MOS:").is_none());
        assert!(catalog.classify("MOS:_X").is_none());
    }

    #[test]
    fn test_duplicate_alias_rejected() {
        let json = r#"{"entries": [
            {"code": "WP:A", "category": "policy", "aliases": ["WP:SAME"]},
            {"code": "WP:B", "category": "essay", "aliases": ["wp:same"]}
        ]}"#;
        let err = ShortcutCatalog::from_json_str(json).unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateAlias { .. }));
    }

    #[test]
    fn test_invalid_family_rejected() {
        let json = r#"{"families": [{"prefix": "MOS", "category": "guideline"}]}"#;
        let err = ShortcutCatalog::from_json_str(json).unwrap_err();
        assert!(matches!(err, CatalogError::InvalidFamily(_)));
    }

    #[test]
    fn test_code_is_always_an_alias() {
        let json = r#"{"entries": [{"code": " WP:X ", "category": "essay"}]}"#;
        let catalog = ShortcutCatalog::from_json_str(json).unwrap();
        let entry = catalog.lookup("WP:X").unwrap();
        assert_eq!(entry.code, "WP:X");
        assert!(entry.aliases.contains("WP:X"));
    }

    #[test]
    fn test_load_missing_file_is_error() {
        let err = ShortcutCatalog::load(Path::new("/nonexistent/catalog.json")).unwrap_err();
        assert!(matches!(err, CatalogError::Io { .. }));
    }
}
