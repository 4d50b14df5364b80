//! Image engine: input normalization and detection overlay rendering.

mod image;
pub use image::*;
mod normalize;
pub use normalize::*;
mod prediction;
pub use prediction::*;
mod surface;
pub use ab_glyph::FontArc;
pub use surface::*;
mod wrap;
pub use wrap::*;

pub mod overlay;
pub use overlay::render;

#[cfg(feature = "heic")]
mod heic;
#[cfg(feature = "heic")]
pub use heic::LibHeif;
