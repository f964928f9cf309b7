pub mod engine;
pub mod stats;
pub mod template;

pub use engine::{aggregate, Aggregation, EngineError};
pub use template::{synthesize_template, WILDCARD};
