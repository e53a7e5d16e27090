//! gb7edit: a layered raster engine built around the GB7 format
//! (7-bit grayscale with a 1-bit mask).
//!
//! [`project::Project`] is the entry point for editing; the modules under
//! [`ops`] hold the pixel algorithms it drives.

#![allow(clippy::too_many_arguments)]

#[macro_use]
pub mod logger;
pub mod canvas;
pub mod cli;
pub mod error;
pub mod gb7;
pub mod io;
pub mod ops;
pub mod project;
pub mod settings;
pub mod worker;

pub use canvas::{AlphaState, BlendMode, CanvasState, Layer, LayerId};
pub use error::{EngineError, Result};
pub use project::Project;
