//! Shared schemas for the newsroom pipeline

pub mod calendar;
pub mod news;
pub mod record;

pub use calendar::*;
pub use news::*;
pub use record::*;
