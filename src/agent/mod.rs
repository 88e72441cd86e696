//! Decision logic for the automated agent: when it may speak, when the
//! contact is most likely to answer, and what it is trying to achieve.

pub mod best_time;
pub mod goals;
pub mod safety;
