pub mod adjustments;
pub mod canvas_ops;
pub mod colors;
pub mod filters;
pub mod transform;
