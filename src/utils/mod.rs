pub mod size;
pub mod tracing;
