use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::store::RawTable;

pub const KEY_FIELD: &str = "location_key";
pub const NAME_FIELD: &str = "country_name";

/// Common spellings that do not appear verbatim in the reference index.
const COMMON_ALIASES: [(&str, &str); 15] = [
    ("united states", "us"),
    ("united states of america", "us"),
    ("usa", "us"),
    ("united kingdom", "gb"),
    ("uk", "gb"),
    ("russia", "ru"),
    ("russian federation", "ru"),
    ("china", "cn"),
    ("people's republic of china", "cn"),
    ("korea, republic of", "kr"),
    ("south korea", "kr"),
    ("korea, democratic people's republic of", "kp"),
    ("north korea", "kp"),
    ("iran", "ir"),
    ("iran, islamic republic of", "ir"),
];

/// ISO 3166 numeric ids used by world-atlas features.
const NUMERIC_IDS: [(&str, &str); 17] = [
    ("840", "us"),
    ("826", "gb"),
    ("250", "fr"),
    ("276", "de"),
    ("380", "it"),
    ("724", "es"),
    ("156", "cn"),
    ("392", "jp"),
    ("356", "in"),
    ("643", "ru"),
    ("076", "br"),
    ("124", "ca"),
    ("036", "au"),
    ("410", "kr"),
    ("408", "kp"),
    ("364", "ir"),
    ("710", "za"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountryEntry {
    pub country_key: String,
    pub country_name: String,
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Bidirectional country name and key lookup, read-only once built.
#[derive(Debug, Clone, Default)]
pub struct CountryIndex {
    key_by_name: HashMap<String, String>,
    name_by_key: HashMap<String, String>,
    entries: Vec<CountryEntry>,
}

impl CountryIndex {
    pub fn build_from(rows: &RawTable) -> Self {
        let mut index = Self::default();

        if let (Some(key_pos), Some(name_pos)) =
            (rows.column_position(KEY_FIELD), rows.column_position(NAME_FIELD))
        {
            for row in 0..rows.len() {
                let (Some(key), Some(name)) = (rows.cell(row, key_pos), rows.cell(row, name_pos)) else {
                    continue;
                };
                // Keys are canonical lowercase, matching ingested records
                let key = normalize(key);
                if key.is_empty() {
                    continue;
                }
                index.key_by_name.insert(normalize(name), key.clone());
                index.name_by_key.insert(key.clone(), name.to_string());
                index.entries.push(CountryEntry {
                    country_key: key,
                    country_name: name.to_string(),
                });
            }
        } else {
            debug!("Country index lacks '{}' or '{}' columns", KEY_FIELD, NAME_FIELD);
        }

        info!("Built country code map with {} entries", index.key_by_name.len());

        for (alias, key) in COMMON_ALIASES {
            index
                .key_by_name
                .entry(alias.to_string())
                .or_insert_with(|| key.to_string());
        }

        index
    }

    /// Case and whitespace insensitive name lookup.
    pub fn key_from_name(&self, name: &str) -> Option<&str> {
        let name = normalize(name);
        if name.is_empty() {
            return None;
        }
        self.key_by_name.get(&name).map(String::as_str)
    }

    /// Display name for a key; unmapped keys are returned unchanged.
    pub fn name_from_key(&self, key: &str) -> String {
        if key.trim().is_empty() {
            return "Unknown".to_string();
        }
        self.name_by_key
            .get(&normalize(key))
            .cloned()
            .unwrap_or_else(|| key.to_string())
    }

    pub fn key_from_numeric_id(&self, id: &str) -> Option<&'static str> {
        let id = id.trim();
        NUMERIC_IDS
            .iter()
            .find(|(numeric, _)| *numeric == id)
            .map(|(_, key)| *key)
    }

    /// Resolve a map feature by its name first, then by its numeric id.
    pub fn resolve_feature(&self, name: &str, numeric_id: Option<&str>) -> Option<String> {
        self.key_from_name(name)
            .map(str::to_string)
            .or_else(|| numeric_id.and_then(|id| self.key_from_numeric_id(id)).map(str::to_string))
    }

    /// Reference-index entries in their original order.
    pub fn entries(&self) -> &[CountryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
