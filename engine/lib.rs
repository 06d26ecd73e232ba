#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod belief;
pub mod config;
pub mod constraints;
pub mod data;
pub mod record;
pub mod selector;
pub mod session;
pub mod simulate;
pub mod table;

pub use belief::{BeliefState, RankedDisease, Response};
pub use constraints::{Assignment, Constraint, ConstraintChecker, ValidationError, Verdict};
pub use data::{DataError, Dataset, load_dataset};
pub use selector::{AskedSet, QuestionSelector, Selection};
pub use session::{Session, SessionConfig, SessionOutcome, StopReason};
pub use table::{ProbabilityTable, build_table};
