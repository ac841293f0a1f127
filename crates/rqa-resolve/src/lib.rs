//! Pure resolution components between the planner and the store.
//!
//! Provides filter normalization ([`normalize::FilterNormalizer`]), placeholder
//! substitution across plan steps, fuzzy person resolution, name similarity,
//! and structural plan validation with best-effort filter repair.

pub mod entity;
pub mod normalize;
pub mod placeholder;
pub mod similarity;
pub mod validate;
