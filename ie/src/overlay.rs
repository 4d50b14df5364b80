//! Detection overlay rendering.
//!
//! Draws the source photo, then one stroked box and one wrapped label per
//! prediction, in list order. When nothing clears the confidence threshold a
//! single centered message replaces all boxes.

use image::{Rgba, RgbaImage};

use crate::{Color, Prediction, Surface, nothing_recognized, wrap_text};

pub const BOX_LINE_WIDTH: u32 = 2;
pub const LABEL_MAX_WIDTH: f32 = 100.0;
pub const LABEL_LINE_HEIGHT: f32 = 20.0;
pub const NOT_RECOGNIZED: &str = "Not recognized";

const BOX_COLOR: Color = Color::new(242, 78, 7);
const LABEL_COLOR: Color = Color::new(96, 250, 109);
const PAINT_ALPHA: f32 = 0.87;

pub fn box_paint() -> Rgba<u8> {
	BOX_COLOR.with_alpha(PAINT_ALPHA)
}

pub fn label_paint() -> Rgba<u8> {
	LABEL_COLOR.with_alpha(PAINT_ALPHA)
}

/// Render `image` and `predictions` onto `surface`, which is first resized to
/// the image's pixel dimensions.
pub fn render(surface: &mut impl Surface, image: &RgbaImage, predictions: &[Prediction]) {
	let (width, height) = image.dimensions();
	surface.resize(width, height);
	surface.draw_image(image, 0, 0);

	if nothing_recognized(predictions) {
		tracing::debug!(count = predictions.len(), "no confident detection; drawing fallback");
		let text_w = surface.measure_text(NOT_RECOGNIZED);
		let x = (width as f32 - text_w) / 2.0;
		let y = (height as f32 - LABEL_LINE_HEIGHT) / 2.0;
		surface.fill_text(NOT_RECOGNIZED, x, y, box_paint());
		return;
	}

	for prediction in predictions {
		let (x, y) = prediction.top_left();
		let (x, y) = (x as f32, y as f32);
		surface.stroke_rect(
			x,
			y,
			prediction.width as f32,
			prediction.height as f32,
			BOX_LINE_WIDTH,
			box_paint(),
		);

		let lines = wrap_text(
			&prediction.caption(),
			x,
			y,
			LABEL_MAX_WIDTH,
			LABEL_LINE_HEIGHT,
			|s| surface.measure_text(s),
		);
		for line in lines {
			surface.fill_text(&line.text, line.x, line.y, label_paint());
		}
	}
}
