//! Content detection: rule model, entropy and the classifier.

pub mod classifier;
pub mod entropy;
pub mod rules;

pub use classifier::{Classification, Classifier};
pub use rules::{Condition, Rule, StringPattern};
