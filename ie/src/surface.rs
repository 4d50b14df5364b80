//! Drawing surfaces.
//!
//! The overlay renderer never owns its canvas; it draws through a [`Surface`]
//! handle the caller passes in. [`RasterSurface`] is the real one: an RGBA
//! buffer painted with `imageproc` and an `ab_glyph` font.

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use anyhow::{Context, Result};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{Blend, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

/// Pixel size of overlay text.
pub const FONT_SIZE: f32 = 20.0;

pub trait Surface {
	/// Resize to `width` x `height`, discarding any prior content.
	fn resize(&mut self, width: u32, height: u32);

	fn dimensions(&self) -> (u32, u32);

	/// Composite `image` with its top-left corner at `(x, y)`, unscaled.
	fn draw_image(&mut self, image: &RgbaImage, x: i64, y: i64);

	/// Stroke the outline of a rectangle, centered on its edges like a 2D canvas does.
	fn stroke_rect(&mut self, x: f32, y: f32, width: f32, height: f32, line_width: u32, color: Rgba<u8>);

	/// Fill `text` with its top-left corner at `(x, y)`.
	fn fill_text(&mut self, text: &str, x: f32, y: f32, color: Rgba<u8>);

	/// Width of `text` in pixels in the surface's active font.
	fn measure_text(&self, text: &str) -> f32;
}

pub fn load_font(path: &Path) -> Result<FontArc> {
	let bytes = std::fs::read(path).with_context(|| format!("read font {}", path.display()))?;
	FontArc::try_from_vec(bytes).with_context(|| format!("parse font {}", path.display()))
}

pub struct RasterSurface {
	canvas: RgbaImage,
	font: Option<FontArc>,
	scale: PxScale,
	warned_no_font: bool,
}

impl RasterSurface {
	/// A 0x0 surface. Without a font, text is skipped and measures as zero width.
	pub fn new(font: Option<FontArc>) -> Self {
		Self {
			canvas: RgbaImage::new(0, 0),
			font,
			scale: PxScale::from(FONT_SIZE),
			warned_no_font: false,
		}
	}

	pub fn canvas(&self) -> &RgbaImage {
		&self.canvas
	}

	pub fn save_png<P: AsRef<Path>>(&self, path: P) -> Result<()> {
		self.canvas
			.save_with_format(path, image::ImageFormat::Png)
			.context("save png")
	}

	fn with_blend(&mut self, f: impl FnOnce(&mut Blend<RgbaImage>)) {
		let mut blend = Blend(std::mem::replace(&mut self.canvas, RgbaImage::new(0, 0)));
		f(&mut blend);
		self.canvas = blend.0;
	}
}

/// Clip `(left, top, width, height)` to `bounds` (left, top, right, bottom).
/// `None` when nothing of it falls inside.
fn clip_rect(left: i64, top: i64, width: i64, height: i64, bounds: (i64, i64, i64, i64)) -> Option<Rect> {
	let (min_x, min_y, max_x, max_y) = bounds;
	let l = left.max(min_x);
	let t = top.max(min_y);
	let r = left.saturating_add(width).min(max_x);
	let b = top.saturating_add(height).min(max_y);
	if r - l < 1 || b - t < 1 {
		return None;
	}
	let width = u32::try_from(r - l).ok()?;
	let height = u32::try_from(b - t).ok()?;
	Some(Rect::at(i32::try_from(l).ok()?, i32::try_from(t).ok()?).of_size(width, height))
}

impl Surface for RasterSurface {
	fn resize(&mut self, width: u32, height: u32) {
		self.canvas = RgbaImage::new(width, height);
	}

	fn dimensions(&self) -> (u32, u32) {
		self.canvas.dimensions()
	}

	fn draw_image(&mut self, image: &RgbaImage, x: i64, y: i64) {
		image::imageops::overlay(&mut self.canvas, image, x, y);
	}

	fn stroke_rect(&mut self, x: f32, y: f32, width: f32, height: f32, line_width: u32, color: Rgba<u8>) {
		let (w, h) = (width.round(), height.round());
		if w < 1.0 || h < 1.0 {
			return;
		}
		let (x, y) = (x.round() as i64, y.round() as i64);
		let (w, h) = (w as i64, h as i64);
		let (canvas_w, canvas_h) = self.canvas.dimensions();

		// A canvas stroke of width N straddles the path: N/2 outside, N/2 inside.
		let outside = i64::from(line_width / 2);
		// Edges clipped to this margin land off-canvas and stay invisible.
		let margin = i64::from(line_width.max(1));
		let bounds = (-margin, -margin, i64::from(canvas_w) + margin, i64::from(canvas_h) + margin);

		self.with_blend(|canvas| {
			for i in 0..i64::from(line_width) {
				let inset = i - outside;
				let rw = w.saturating_sub(2 * inset);
				let rh = h.saturating_sub(2 * inset);
				if rw < 1 || rh < 1 {
					break;
				}
				let left = x.saturating_add(inset);
				let top = y.saturating_add(inset);
				let Some(rect) = clip_rect(left, top, rw, rh, bounds) else {
					continue;
				};
				draw_hollow_rect_mut(canvas, rect, color);
			}
		});
	}

	fn fill_text(&mut self, text: &str, x: f32, y: f32, color: Rgba<u8>) {
		let Some(font) = self.font.clone() else {
			if !self.warned_no_font {
				tracing::warn!("no font loaded; overlay text is not drawn");
				self.warned_no_font = true;
			}
			return;
		};
		let (canvas_w, canvas_h) = self.canvas.dimensions();
		let (text_w, text_h) = text_size(self.scale, &font, text);
		let (x, y) = (x.round() as i64, y.round() as i64);
		// Entirely off-canvas text is skipped; what remains fits in i32.
		if x >= i64::from(canvas_w)
			|| y >= i64::from(canvas_h)
			|| x.saturating_add(i64::from(text_w)) < 0
			|| y.saturating_add(i64::from(text_h).max(FONT_SIZE as i64)) < 0
		{
			return;
		}
		let scale = self.scale;
		self.with_blend(|canvas| {
			draw_text_mut(canvas, color, x as i32, y as i32, scale, &font, text);
		});
	}

	fn measure_text(&self, text: &str) -> f32 {
		match &self.font {
			Some(font) => text_size(self.scale, font, text).0 as f32,
			None => 0.0,
		}
	}
}
