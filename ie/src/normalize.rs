//! Input normalization.
//!
//! Every input image is turned into a file the inference service and the
//! renderer both understand. HEIC/HEIF photos (the iPhone default) are
//! re-encoded as JPEG; everything else passes through untouched.

use std::path::Path;

/// JPEG quality used when re-encoding HEIC input.
pub const HEIC_JPEG_QUALITY: u8 = 90;

/// An image file travelling through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFile {
	pub name: String,
	pub mime: String,
	pub bytes: Vec<u8>,
}

impl ImageFile {
	pub fn new(name: impl Into<String>, mime: impl Into<String>, bytes: Vec<u8>) -> Self {
		Self {
			name: name.into(),
			mime: mime.into(),
			bytes,
		}
	}

	/// Read `path` and label it with a MIME type derived from its extension.
	pub fn from_path(path: &Path) -> std::io::Result<Self> {
		let bytes = std::fs::read(path)?;
		let name = path
			.file_name()
			.and_then(|n| n.to_str())
			.unwrap_or("upload")
			.to_string();
		Ok(Self::new(name, mime_from_extension(path), bytes))
	}

	/// HEIC/HEIF by declared type or filename suffix (case-insensitive).
	pub fn is_heic(&self) -> bool {
		let mime = self.mime.to_ascii_lowercase();
		let name = self.name.to_ascii_lowercase();
		matches!(mime.as_str(), "image/heic" | "image/heif")
			|| name.ends_with(".heic")
			|| name.ends_with(".heif")
	}
}

/// Detect an image MIME type by file extension.
pub fn mime_from_extension(path: &Path) -> &'static str {
	let ext = path
		.extension()
		.and_then(|e| e.to_str())
		.unwrap_or("")
		.to_lowercase();

	match ext.as_str() {
		"jpg" | "jpeg" => "image/jpeg",
		"png"          => "image/png",
		"gif"          => "image/gif",
		"webp"         => "image/webp",
		"bmp"          => "image/bmp",
		"tiff" | "tif" => "image/tiff",
		"avif"         => "image/avif",
		"heic"         => "image/heic",
		"heif"         => "image/heif",
		_              => "application/octet-stream",
	}
}

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
	#[error("unsupported image format: {0}")]
	UnsupportedFormat(String),
}

/// Opaque HEIC -> JPEG codec.
pub trait HeicConverter: Send + Sync {
	fn to_jpeg(&self, heic: &[u8], quality: u8) -> anyhow::Result<Vec<u8>>;
}

/// Converter used when the crate is built without the `heic` feature.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHeicSupport;

impl HeicConverter for NoHeicSupport {
	fn to_jpeg(&self, _heic: &[u8], _quality: u8) -> anyhow::Result<Vec<u8>> {
		anyhow::bail!("this build has no HEIC decoder (enable the `heic` feature)")
	}
}

/// The best converter this build has.
pub fn default_heic_converter() -> Box<dyn HeicConverter> {
	#[cfg(feature = "heic")]
	{
		Box::new(crate::heic::LibHeif)
	}
	#[cfg(not(feature = "heic"))]
	{
		Box::new(NoHeicSupport)
	}
}

/// Convert HEIC input to JPEG, pass anything else through unchanged.
pub fn normalize(file: ImageFile, heic: &dyn HeicConverter) -> Result<ImageFile, NormalizeError> {
	if !file.is_heic() {
		return Ok(file);
	}

	let jpeg = heic
		.to_jpeg(&file.bytes, HEIC_JPEG_QUALITY)
		.map_err(|err| NormalizeError::UnsupportedFormat(format!("{}: {err:#}", file.name)))?;

	let stem = Path::new(&file.name)
		.file_stem()
		.and_then(|s| s.to_str())
		.filter(|s| !s.is_empty())
		.unwrap_or("upload");
	tracing::debug!(from = %file.name, bytes = jpeg.len(), "converted HEIC to JPEG");

	Ok(ImageFile::new(format!("{stem}.jpg"), "image/jpeg", jpeg))
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};

	#[derive(Default)]
	struct FakeHeic {
		calls: AtomicUsize,
		fail: bool,
	}

	impl HeicConverter for FakeHeic {
		fn to_jpeg(&self, heic: &[u8], quality: u8) -> anyhow::Result<Vec<u8>> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			assert_eq!(quality, HEIC_JPEG_QUALITY);
			if self.fail {
				anyhow::bail!("corrupt container");
			}
			Ok(heic.iter().rev().copied().collect())
		}
	}

	#[test]
	fn heic_detection_is_case_insensitive() {
		assert!(ImageFile::new("IMG_0001.HEIC", "", vec![]).is_heic());
		assert!(ImageFile::new("blob", "image/HEIC", vec![]).is_heic());
		assert!(ImageFile::new("x.heif", "application/octet-stream", vec![]).is_heic());
		assert!(!ImageFile::new("car.jpg", "image/jpeg", vec![]).is_heic());
		assert!(!ImageFile::new("heic.png", "image/png", vec![]).is_heic());
	}

	#[test]
	fn passes_other_formats_through() {
		let conv = FakeHeic::default();
		let file = ImageFile::new("car.png", "image/png", vec![1, 2, 3]);
		assert_eq!(normalize(file.clone(), &conv).unwrap(), file);
		assert_eq!(conv.calls.load(Ordering::SeqCst), 0);
	}

	#[test]
	fn converts_heic_to_jpeg() {
		let conv = FakeHeic::default();
		let out = normalize(ImageFile::new("IMG_0001.HEIC", "image/heic", vec![1, 2, 3]), &conv).unwrap();
		assert_eq!(out.name, "IMG_0001.jpg");
		assert_eq!(out.mime, "image/jpeg");
		assert_eq!(out.bytes, vec![3, 2, 1]);
	}

	#[test]
	fn conversion_failure_is_unsupported_format() {
		let conv = FakeHeic { fail: true, ..Default::default() };
		let err = normalize(ImageFile::new("a.heic", "", vec![0]), &conv).unwrap_err();
		let NormalizeError::UnsupportedFormat(msg) = err;
		assert!(msg.contains("a.heic"));
		assert!(msg.contains("corrupt container"));
	}

	#[test]
	fn builds_without_decoder_reject_heic() {
		let err = normalize(ImageFile::new("a.heic", "image/heic", vec![0]), &NoHeicSupport);
		assert!(matches!(err, Err(NormalizeError::UnsupportedFormat(_))));
	}

	#[test]
	fn mime_by_extension() {
		assert_eq!(mime_from_extension(Path::new("photo.JPG")), "image/jpeg");
		assert_eq!(mime_from_extension(Path::new("photo.heic")), "image/heic");
		assert_eq!(mime_from_extension(Path::new("notes.xyz")), "application/octet-stream");
	}
}
