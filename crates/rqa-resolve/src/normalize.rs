//! FilterNormalizer: canonical field + raw value → store filter condition.
//!
//! Expansion is a pure function of (field, value), so the same planner output
//! always produces the same store query.

use rqa_core::document::scalar_to_string;
use rqa_core::filter::{Filter, FilterError, combine_and, combine_or, is_operator_mapping};
use rqa_core::schema::SchemaAliasMap;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

const LEVEL_WORDS: [&str; 6] = ["First", "Second", "Third", "Fourth", "Fifth", "Sixth"];
const LEVEL_ROMAN: [&str; 6] = ["I", "II", "III", "IV", "V", "VI"];
const LEVEL_NOISE: [&str; 5] = ["year", "yr", "level", "lvl", "yearlvl"];

/// Expands values into every spelling the ingested records are known to use.
#[derive(Debug, Clone, Default)]
pub struct FilterNormalizer {
    /// Curated program alias groups; the code comes first in each group.
    programs: Vec<Vec<String>>,
}

impl FilterNormalizer {
    /// Build from `code → aliases` groups (see `[normalization.programs]`).
    pub fn new(programs: &BTreeMap<String, Vec<String>>) -> Self {
        let programs = programs
            .iter()
            .map(|(code, names)| {
                let mut group = vec![code.clone()];
                group.extend(names.iter().cloned());
                dedup(group)
            })
            .collect();
        Self { programs }
    }

    /// Expand `value` for the canonical `field` into a condition mapping.
    ///
    /// Operator mappings pass through unchanged, so expansion is idempotent.
    pub fn expand(&self, field: &str, value: &Value) -> Value {
        if is_operator_mapping(value) {
            return value.clone();
        }
        if let Value::Array(items) = value {
            let mut all = Vec::new();
            for item in items {
                all.extend(self.spellings(field, &stringify(item)));
            }
            return json!({"$in": dedup(all)});
        }
        let raw = stringify(value);
        match field {
            "program" | "year_level" | "section" => json!({"$in": self.spellings(field, &raw)}),
            _ => json!({"$eq": raw}),
        }
    }

    /// All spellings of one value, the literal first.
    fn spellings(&self, field: &str, raw: &str) -> Vec<String> {
        match field {
            "program" => self.program_spellings(raw),
            "year_level" => year_level_spellings(raw),
            "section" => section_spellings(raw),
            _ => vec![raw.to_string()],
        }
    }

    fn program_spellings(&self, raw: &str) -> Vec<String> {
        let needle = raw.trim();
        let mut base = vec![needle.to_string()];
        if let Some(group) = self
            .programs
            .iter()
            .find(|g| g.iter().any(|name| name.eq_ignore_ascii_case(needle)))
        {
            base.extend(group.iter().cloned());
        }
        let mut out = Vec::with_capacity(base.len() * 3);
        for name in base {
            let upper = name.to_uppercase();
            let capitalized = capitalize_words(&name);
            out.push(name);
            out.push(upper);
            out.push(capitalized);
        }
        dedup(out)
    }

    /// Build the store filter for a planner `filters` mapping.
    ///
    /// Each key is mapped to its canonical field, expanded, and tested under
    /// every observed spelling (`$or`); distinct fields combine with `$and`.
    pub fn build_filter(
        &self,
        filters: &Map<String, Value>,
        aliases: &SchemaAliasMap,
    ) -> Result<Option<Filter>, FilterError> {
        let mut parts = Vec::with_capacity(filters.len());
        for (key, raw) in filters {
            match key.as_str() {
                "$and" | "$or" => {
                    let branches = raw
                        .as_array()
                        .ok_or_else(|| FilterError::ExpectedBranches(key.clone()))?;
                    let mut built = Vec::with_capacity(branches.len());
                    for branch in branches {
                        let map = branch
                            .as_object()
                            .ok_or_else(|| FilterError::NotAMapping(branch.to_string()))?;
                        if let Some(f) = self.build_filter(map, aliases)? {
                            built.push(f);
                        }
                    }
                    let combined = if key == "$and" {
                        combine_and(built)
                    } else {
                        combine_or(built)
                    };
                    parts.extend(combined);
                }
                op if op.starts_with('$') => {
                    return Err(FilterError::UnknownOperator(op.to_string()));
                }
                field => {
                    let canonical = aliases.canonical_of(field);
                    let condition = self.expand(&canonical, raw);
                    let per_spelling = aliases
                        .spellings(&canonical)
                        .iter()
                        .map(|spelling| Filter::field_from_value(spelling, &condition))
                        .collect::<Result<Vec<_>, _>>()?;
                    parts.extend(combine_or(per_spelling));
                }
            }
        }
        Ok(combine_and(parts))
    }
}

fn stringify(value: &Value) -> String {
    scalar_to_string(value).unwrap_or_else(|| match value {
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

fn dedup(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        if !item.is_empty() && !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

fn capitalize_words(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

fn ordinal(n: u32) -> String {
    let suffix = match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{}{}", n, suffix)
}

/// Extract a year level from `2`, `2nd`, `second`, `II`, `Year 2`, `2nd year`.
pub fn parse_year_level(raw: &str) -> Option<u32> {
    let lower = raw.to_lowercase();
    let token = lower
        .split(|c: char| !c.is_alphanumeric())
        .find(|t| !t.is_empty() && !LEVEL_NOISE.contains(t))?;
    if let Ok(n) = token.parse::<u32>() {
        return (n > 0).then_some(n);
    }
    for suffix in ["st", "nd", "rd", "th"] {
        if let Some(digits) = token.strip_suffix(suffix)
            && let Ok(n) = digits.parse::<u32>()
        {
            return (n > 0).then_some(n);
        }
    }
    if let Some(pos) = LEVEL_WORDS
        .iter()
        .position(|w| w.eq_ignore_ascii_case(token))
    {
        return Some(pos as u32 + 1);
    }
    LEVEL_ROMAN
        .iter()
        .position(|r| r.eq_ignore_ascii_case(token))
        .map(|pos| pos as u32 + 1)
}

fn year_level_spellings(raw: &str) -> Vec<String> {
    let literal = raw.trim().to_string();
    let Some(n) = parse_year_level(&literal) else {
        return vec![literal];
    };
    let mut out = vec![
        literal,
        n.to_string(),
        format!("Year {}", n),
        format!("{} Year", ordinal(n)),
    ];
    if let Some(idx) = (n as usize).checked_sub(1).filter(|i| *i < LEVEL_WORDS.len()) {
        out.push(format!("{} Year", LEVEL_WORDS[idx]));
        out.push(format!("Year {}", LEVEL_ROMAN[idx]));
    }
    dedup(out)
}

fn section_spellings(raw: &str) -> Vec<String> {
    let literal = raw.trim().to_string();
    let lower = literal.to_lowercase();
    let bare = ["section", "sec"]
        .iter()
        .find_map(|prefix| {
            lower
                .strip_prefix(prefix)
                .filter(|rest| rest.chars().next().is_none_or(|c| !c.is_alphabetic()))
                .and_then(|_| literal.get(prefix.len()..))
        })
        .map(|rest| rest.trim_start_matches(['.', ' ', '-', ':']).trim())
        .filter(|rest| !rest.is_empty())
        .unwrap_or(literal.as_str())
        .to_string();
    let upper = bare.to_uppercase();
    dedup(vec![
        literal.clone(),
        bare,
        upper.clone(),
        format!("SEC {}", upper),
        format!("Section {}", upper),
    ])
}
