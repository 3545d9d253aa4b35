//! Workflow definitions and their activities.

pub mod definitions;
pub mod resolution;
pub mod shared;
pub mod validation;

pub use resolution::ResolutionActivities;
pub use validation::ValidationActivities;
