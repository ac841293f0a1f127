//! Person resolution: a free-text name → canonical identity with aliases.

use crate::similarity::NameMatcher;
use rqa_core::config::ResolutionConfig;
use rqa_core::document::{Document, Entity, scalar_to_string};
use rqa_core::schema::SchemaAliasMap;
use rqa_core::store::{DocumentStore, StoreError, StoreQuery};
use std::cmp::Ordering;
use std::collections::HashSet;

/// Fields naming the person a record is *about*, in preference order.
/// `adviser` names someone else, so it only contributes candidates.
const IDENTITY_FIELDS: [&str; 2] = ["full_name", "staff_name"];

/// Resolves person names against the store. Entities are never cached.
pub struct EntityResolver<'a> {
    store: &'a dyn DocumentStore,
    aliases: &'a SchemaAliasMap,
    settings: &'a ResolutionConfig,
    matcher: NameMatcher,
}

impl<'a> EntityResolver<'a> {
    pub fn new(
        store: &'a dyn DocumentStore,
        aliases: &'a SchemaAliasMap,
        settings: &'a ResolutionConfig,
    ) -> Self {
        Self {
            store,
            aliases,
            settings,
            matcher: NameMatcher::new(&settings.honorifics),
        }
    }

    /// Resolve `name` to an [`Entity`]. An empty entity means nobody matched.
    pub fn resolve(&self, name: &str) -> Result<Entity, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(Entity::empty());
        }

        let hits = self.search(name)?;
        if hits.is_empty() {
            tracing::debug!("no records mention '{}'", name);
            return Ok(Entity::empty());
        }

        let name_keys = self.keys_for(&self.settings.name_fields);
        let mut candidates = Vec::new();
        let mut seen = HashSet::new();
        for doc in &hits {
            for key in &name_keys {
                if let Some(value) = doc.meta_str(key)
                    && !value.trim().is_empty()
                    && seen.insert(value.clone())
                {
                    candidates.push(value);
                }
            }
        }

        // The queried name is the first candidate. The longest matching name
        // becomes primary; on equal length a store spelling beats the query's.
        let mut entity = Entity::new(name);
        let mut primary_from_store = false;
        let mut store_match = false;
        for candidate in candidates {
            let score = self.matcher.similarity(&entity.primary_name, &candidate);
            if score < self.settings.match_threshold {
                continue;
            }
            store_match = true;
            let longer = self
                .matcher
                .name_length(&candidate)
                .cmp(&self.matcher.name_length(&entity.primary_name));
            if longer == Ordering::Greater
                || (longer == Ordering::Equal && !primary_from_store)
            {
                entity.set_primary(candidate);
                primary_from_store = true;
            } else {
                entity.aliases.insert(candidate);
            }
        }
        if !store_match {
            tracing::debug!("no candidate for '{}' cleared the match threshold", name);
            return Ok(Entity::empty());
        }

        entity.primary_document = self
            .primary_document(&hits, &entity)
            .or_else(|| hits.first().cloned());
        Ok(entity)
    }

    /// True when two person names denote the same person for roster merging.
    pub fn is_duplicate(&self, a: &str, b: &str) -> bool {
        self.matcher.similarity(a, b) >= self.settings.duplicate_threshold
    }

    /// Name of the person a record is about, if it carries one.
    pub fn identity_name(&self, doc: &Document) -> Option<String> {
        self.keys_for(&IDENTITY_FIELDS)
            .iter()
            .find_map(|key| doc.metadata.get(key).and_then(scalar_to_string))
            .filter(|name| !name.trim().is_empty())
    }

    /// Drop records whose person is a near-duplicate of an earlier record.
    /// Records without a name are kept as they are.
    pub fn dedupe_people(&self, docs: Vec<Document>) -> Vec<Document> {
        let mut kept_names: Vec<String> = Vec::new();
        let mut out = Vec::with_capacity(docs.len());
        for doc in docs {
            match self.identity_name(&doc) {
                Some(name) => {
                    if kept_names.iter().any(|kept| self.is_duplicate(kept, &name)) {
                        continue;
                    }
                    kept_names.push(name);
                    out.push(doc);
                }
                None => out.push(doc),
            }
        }
        out
    }

    /// Every record mentioning the name under any of the entity's aliases,
    /// in first-seen order.
    pub fn records_for(&self, entity: &Entity) -> Result<Vec<Document>, StoreError> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        for alias in &entity.aliases {
            let query = StoreQuery::text(alias.as_str()).with_limit(self.settings.search_limit);
            for doc in self.store.query(&query)? {
                if self.mentions(&doc, entity) && seen.insert(doc.content.clone()) {
                    out.push(doc);
                }
            }
        }
        Ok(out)
    }

    /// True when one of the record's name fields holds one of the entity's aliases.
    pub fn mentions(&self, doc: &Document, entity: &Entity) -> bool {
        self.keys_for(&self.settings.name_fields).iter().any(|key| {
            doc.meta_str(key).is_some_and(|value| {
                entity.has_alias(&value)
                    || entity
                        .aliases
                        .iter()
                        .any(|alias| self.matcher.similarity(alias, &value) >= 1.0)
            })
        })
    }

    /// Store hits for the raw name and its cleaned form, de-duplicated by content.
    fn search(&self, name: &str) -> Result<Vec<Document>, StoreError> {
        let cleaned = self.matcher.search_form(name);
        let mut queries = vec![name.to_string()];
        if !cleaned.is_empty() && cleaned != name {
            queries.push(cleaned);
        }

        let mut hits = Vec::new();
        let mut seen = HashSet::new();
        for text in queries {
            let query = StoreQuery::text(text).with_limit(self.settings.search_limit);
            for doc in self.store.query(&query)? {
                if seen.insert(doc.content.clone()) {
                    hits.push(doc);
                }
            }
        }
        Ok(hits)
    }

    /// The hit whose identity field holds the longest alias.
    fn primary_document(&self, hits: &[Document], entity: &Entity) -> Option<Document> {
        let keys = self.keys_for(&IDENTITY_FIELDS);
        let mut best: Option<(usize, &Document)> = None;
        for doc in hits {
            let longest = keys
                .iter()
                .filter_map(|key| doc.meta_str(key))
                .filter(|value| entity.has_alias(value))
                .map(|value| value.len())
                .max();
            if let Some(len) = longest
                && best.is_none_or(|(best_len, _)| len > best_len)
            {
                best = Some((len, doc));
            }
        }
        best.map(|(_, doc)| doc.clone())
    }

    /// Canonical fields widened to every observed spelling, in order.
    fn keys_for<S: AsRef<str>>(&self, fields: &[S]) -> Vec<String> {
        let mut keys = Vec::new();
        for field in fields {
            for spelling in self.aliases.spellings(field.as_ref()) {
                if !keys.contains(&spelling) {
                    keys.push(spelling);
                }
            }
        }
        keys
    }
}
