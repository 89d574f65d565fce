//! Numeric building blocks: bounding boxes and robust statistics.

pub mod bbox;
pub mod statistics;

pub use bbox::BoundingBox;
