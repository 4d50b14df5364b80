//! libheif-backed HEIC decoding.

use anyhow::{Context, Result};
use libheif_rs::{ColorSpace, HeifContext, LibHeif as Decoder, RgbChroma};

use crate::HeicConverter;

#[derive(Debug, Default, Clone, Copy)]
pub struct LibHeif;

impl HeicConverter for LibHeif {
	fn to_jpeg(&self, heic: &[u8], quality: u8) -> Result<Vec<u8>> {
		let decoder = Decoder::new();
		let ctx = HeifContext::read_from_bytes(heic).context("read HEIF container")?;
		let handle = ctx.primary_image_handle().context("primary image handle")?;
		let decoded = decoder
			.decode(&handle, ColorSpace::Rgb(RgbChroma::Rgb), None)
			.context("decode HEIF image")?;

		let planes = decoded.planes();
		let plane = planes.interleaved.context("HEIF image has no interleaved RGB plane")?;

		// Rows may be padded; copy them out tightly packed.
		let row = plane.width as usize * 3;
		let mut rgb = Vec::with_capacity(row * plane.height as usize);
		for y in 0..plane.height as usize {
			let start = y * plane.stride;
			rgb.extend_from_slice(&plane.data[start..start + row]);
		}

		let frame = crate::OwnedImage::from_rgb(plane.width, plane.height, &rgb)
			.context("HEIF plane shorter than its dimensions")?;
		frame.encode_jpeg(quality)
	}
}
