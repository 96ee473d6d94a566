//! Keyword-priority mapping from free-form labels to the canonical taxonomy.
//!
//! Priority order (first match wins):
//!
//! 1. `dayan`
//! 2. `bayan`
//! 3. `set`
//! 4. `playing_hands`
//! 5. `tabla_performance`
//! 6. `not_tabla`
//!
//! Raw labels often name several categories at once ("tabla drum close-up"
//! mentions the instrument and a close-up framing); the order above decides.
//! Anything unmatched is `unknown`.

use crate::types::{CurateError, CurateResult};
use data_contracts::CanonicalLabel;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

const DEFAULT_CATEGORIES: &[(CanonicalLabel, &[&str])] = &[
    (CanonicalLabel::Dayan, &["dayan", "dayan_drum_right_hand"]),
    (CanonicalLabel::Bayan, &["bayan", "bayan_drum_left_hand"]),
    (
        CanonicalLabel::Set,
        &[
            "tabla",
            "pair",
            "set",
            "tabla_set",
            "tabla drums",
            "tabla_pair",
            "tabla_image",
        ],
    ),
    (
        CanonicalLabel::PlayingHands,
        &[
            "hands",
            "close_up",
            "hand_playing",
            "tabla hands",
            "tabla playing up close",
        ],
    ),
    (
        CanonicalLabel::TablaPerformance,
        &[
            "performance",
            "on stage",
            "live",
            "concert",
            "player",
            "tabla performance",
            "tabla player on stage",
        ],
    ),
    (
        CanonicalLabel::NotTabla,
        &[
            "snare",
            "drum kit",
            "drumset",
            "guitar",
            "music notation",
            "invalid",
            "other",
        ],
    ),
];

/// Case-fold, turn separators into spaces, collapse whitespace.
pub fn normalize_text(raw: &str) -> String {
    let folded: String = raw
        .chars()
        .map(|c| match c {
            '_' | '-' | '/' | '.' | ',' => ' ',
            c => c,
        })
        .collect::<String>()
        .to_lowercase();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub label: CanonicalLabel,
    /// Stored normalized.
    pub keywords: Vec<String>,
}

/// Ordered taxonomy. The `Vec` order is the match priority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Taxonomy {
    categories: Vec<Category>,
}

impl Default for Taxonomy {
    fn default() -> Self {
        let categories = DEFAULT_CATEGORIES
            .iter()
            .map(|(label, kws)| (*label, kws.iter().map(|k| k.to_string()).collect()))
            .collect();
        Self::new(categories).expect("built-in taxonomy is valid")
    }
}

#[derive(Debug, Deserialize)]
struct TaxonomyFile {
    category: Vec<CategoryEntry>,
}

#[derive(Debug, Deserialize)]
struct CategoryEntry {
    label: String,
    keywords: Vec<String>,
}

impl Taxonomy {
    pub fn new(categories: Vec<(CanonicalLabel, Vec<String>)>) -> CurateResult<Self> {
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(categories.len());
        for (label, keywords) in categories {
            if label == CanonicalLabel::Unknown {
                return Err(CurateError::Taxonomy(
                    "`unknown` is the fallback and cannot carry keywords".into(),
                ));
            }
            if !seen.insert(label) {
                return Err(CurateError::Taxonomy(format!("{label} listed twice")));
            }
            let keywords: Vec<String> = keywords
                .iter()
                .map(|k| normalize_text(k))
                .filter(|k| !k.is_empty())
                .collect();
            if keywords.is_empty() {
                return Err(CurateError::Taxonomy(format!("{label} has no keywords")));
            }
            out.push(Category { label, keywords });
        }
        Ok(Self { categories: out })
    }

    /// Parse an ordered `[[category]]` array from TOML.
    pub fn from_toml_str(raw: &str) -> CurateResult<Self> {
        let file: TaxonomyFile =
            toml::from_str(raw).map_err(|e| CurateError::Taxonomy(e.to_string()))?;
        Self::from_file(file)
    }

    /// Like [`Taxonomy::from_toml_str`]; syntax errors carry the file path.
    pub fn from_path(path: &Path) -> CurateResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| CurateError::io(path, e))?;
        let file: TaxonomyFile = toml::from_str(&raw).map_err(|e| CurateError::Toml {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_file(file)
    }

    fn from_file(file: TaxonomyFile) -> CurateResult<Self> {
        let mut categories = Vec::with_capacity(file.category.len());
        for entry in file.category {
            let label = entry
                .label
                .parse::<CanonicalLabel>()
                .map_err(|e| CurateError::Taxonomy(e.to_string()))?;
            categories.push((label, entry.keywords));
        }
        Self::new(categories)
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn priority_order(&self) -> Vec<CanonicalLabel> {
        self.categories.iter().map(|c| c.label).collect()
    }
}

/// Pure mapping from a raw label string to a [`CanonicalLabel`].
#[derive(Debug, Clone, Default)]
pub struct LabelNormalizer {
    taxonomy: Taxonomy,
}

impl LabelNormalizer {
    pub fn new(taxonomy: Taxonomy) -> Self {
        Self { taxonomy }
    }

    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    pub fn normalize(&self, raw_label: &str) -> CanonicalLabel {
        let text = normalize_text(raw_label);
        if text.is_empty() {
            return CanonicalLabel::Unknown;
        }
        if text == CanonicalLabel::Unknown.as_str() {
            return CanonicalLabel::Unknown;
        }
        // A label that already names a configured category maps to itself.
        if let Some(c) = self
            .taxonomy
            .categories
            .iter()
            .find(|c| normalize_text(c.label.as_str()) == text)
        {
            return c.label;
        }
        self.taxonomy
            .categories
            .iter()
            .find(|c| c.keywords.iter().any(|k| text.contains(k.as_str())))
            .map(|c| c.label)
            .unwrap_or(CanonicalLabel::Unknown)
    }
}
