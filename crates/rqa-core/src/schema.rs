//! Schema alias map: canonical field names ↔ the spellings ingestion produced.
//!
//! Spreadsheets and PDFs name the same column differently (`year`, `yr`,
//! `Year Level`). The map is seeded with a curated table, then widened with the
//! metadata keys actually observed in the store.

use crate::document::{Document, Metadata};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Curated canonical fields and the spellings known to denote them.
pub const BUILTIN_ALIASES: &[(&str, &[&str])] = &[
    (
        "full_name",
        &["name", "fullname", "student_name", "complete_name", "person_name"],
    ),
    (
        "year_level",
        &["year", "yr", "yearlvl", "year_lvl", "level", "yr_level"],
    ),
    ("program", &["course", "prog", "program_code", "degree"]),
    ("section", &["sec", "block", "section_name"]),
    (
        "student_id",
        &["id_no", "id_number", "student_no", "student_number"],
    ),
    ("adviser", &["advisor", "class_adviser", "adviser_name"]),
    (
        "staff_name",
        &["faculty", "faculty_name", "instructor", "teacher", "professor", "employee_name"],
    ),
    ("department", &["dept", "department_name", "college"]),
    ("subject", &["subject_code", "subj", "course_code", "subject_name"]),
    ("day", &["days", "day_of_week"]),
    ("time", &["schedule_time", "time_slot"]),
    ("room", &["room_no", "venue"]),
    ("grade", &["final_grade", "rating", "final_rating"]),
];

/// Bidirectional canonical ↔ original-spelling map.
#[derive(Debug, Clone, Default)]
pub struct SchemaAliasMap {
    /// normalized spelling → canonical field
    reverse: HashMap<String, String>,
    /// canonical field → original keys seen in the store
    observed: BTreeMap<String, BTreeSet<String>>,
}

/// Lowercase and collapse any run of non-alphanumerics into `_`.
pub fn normalize_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut pending_sep = false;
    for ch in key.trim().chars() {
        if ch.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.extend(ch.to_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}

impl SchemaAliasMap {
    /// The curated table only, nothing observed yet.
    pub fn builtin() -> Self {
        let mut map = Self::default();
        for (canonical, spellings) in BUILTIN_ALIASES {
            map.add_alias_group(canonical, spellings.iter().copied());
        }
        map
    }

    /// Register extra spellings for a canonical field (e.g. from `[schema.aliases]`).
    pub fn add_alias_group<'a>(
        &mut self,
        canonical: &str,
        spellings: impl IntoIterator<Item = &'a str>,
    ) {
        let canonical = normalize_key(canonical);
        self.reverse.insert(canonical.clone(), canonical.clone());
        for spelling in spellings {
            self.reverse
                .insert(normalize_key(spelling), canonical.clone());
        }
    }

    /// Record original metadata keys as observed spellings of their canonical field.
    pub fn observe<'a>(&mut self, keys: impl IntoIterator<Item = &'a str>) {
        for key in keys {
            let canonical = self.canonical_of(key);
            self.observed
                .entry(canonical)
                .or_default()
                .insert(key.to_string());
        }
    }

    /// Curated table plus every metadata key across `documents`.
    pub fn from_documents<'a>(documents: impl IntoIterator<Item = &'a Document>) -> Self {
        Self::build(&BTreeMap::new(), documents)
    }

    /// Curated table, then configured groups, then every key observed in `documents`.
    ///
    /// Groups go in before observation so configured spellings land under
    /// their canonical field.
    pub fn build<'a>(
        groups: &BTreeMap<String, Vec<String>>,
        documents: impl IntoIterator<Item = &'a Document>,
    ) -> Self {
        let mut map = Self::builtin();
        for (canonical, spellings) in groups {
            map.add_alias_group(canonical, spellings.iter().map(String::as_str));
        }
        for doc in documents {
            map.observe(doc.metadata.keys().map(String::as_str));
        }
        map
    }

    /// Canonical field for any spelling. Unknown spellings normalize to themselves.
    pub fn canonical_of(&self, spelling: &str) -> String {
        let key = normalize_key(spelling);
        self.reverse.get(&key).cloned().unwrap_or(key)
    }

    /// Every key a store filter on `canonical` should test: the canonical name
    /// first, then each observed original spelling.
    pub fn spellings(&self, canonical: &str) -> Vec<String> {
        let canonical = self.canonical_of(canonical);
        let mut out = vec![canonical.clone()];
        if let Some(seen) = self.observed.get(&canonical) {
            out.extend(seen.iter().filter(|s| **s != canonical).cloned());
        }
        out
    }

    /// Value of the canonical field in `metadata`, under whichever spelling is present.
    pub fn lookup<'m>(&self, metadata: &'m Metadata, canonical: &str) -> Option<&'m Value> {
        let canonical = self.canonical_of(canonical);
        metadata
            .get(&canonical)
            .or_else(|| {
                metadata
                    .iter()
                    .find(|(key, _)| self.canonical_of(key) == canonical)
                    .map(|(_, v)| v)
            })
    }

    /// One line per observed canonical field, for planner prompts and `rqa info`.
    pub fn summary(&self) -> String {
        self.observed
            .iter()
            .map(|(canonical, seen)| {
                let seen: Vec<&str> = seen.iter().map(String::as_str).collect();
                format!("{}: {}", canonical, seen.join(", "))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
