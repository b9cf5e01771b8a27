pub mod diff;

pub use diff::{DiffPlan, diff, diff_preferring};
