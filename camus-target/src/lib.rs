pub mod emit;
pub mod error;
pub mod lower;

pub use error::LowerError;
pub use lower::{lower, P4Table, TargetAction, TargetMatch, TargetPipeline};
