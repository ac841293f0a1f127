//! Builtin tools over the institutional records store.

mod person;
mod roster;
mod search;

pub use person::{GetPersonProfile, GetPersonSchedule, GetStudentGrades, ResolvePerson};
pub use roster::ListPeople;
pub use search::SearchDatabase;

use crate::tool::Tool;
use std::sync::Arc;

/// Default result cap for tool searches when the planner gives none.
pub const DEFAULT_SEARCH_LIMIT: usize = 50;

pub fn builtin_tools() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(SearchDatabase),
        Arc::new(ResolvePerson),
        Arc::new(GetPersonProfile),
        Arc::new(GetPersonSchedule),
        Arc::new(GetStudentGrades),
        Arc::new(ListPeople),
    ]
}
