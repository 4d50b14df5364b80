//! Live camera streams.
//!
//! A [`CameraSession`] holds at most one [`StreamHandle`]. Handles stop their
//! stream on release or drop, and releasing twice is a no-op, so every
//! teardown path (reset, error, app exit) frees the device.

use std::sync::Arc;

#[cfg(feature = "camera")]
mod native;
#[cfg(feature = "camera")]
pub use native::NokhwaBackend;

/// Which physical camera is active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize, clap::ValueEnum)]
pub enum Facing {
	User,
	#[default]
	Environment,
}

impl Facing {
	pub fn opposite(self) -> Self {
		match self {
			Self::User => Self::Environment,
			Self::Environment => Self::User,
		}
	}
}

#[derive(Debug, thiserror::Error)]
pub enum CameraError {
	/// Camera unavailable, busy or permission denied.
	#[error("{0}")]
	Device(String),
}

/// A running device stream.
pub trait VideoStream: Send {
	/// Most recent frame, if the device has produced one yet.
	fn latest_frame(&self) -> Option<ie::OwnedImage>;

	/// Stop the stream and free the device.
	fn stop(&mut self);
}

pub trait CameraBackend: Send + Sync {
	fn open(&self, facing: Facing) -> Result<Box<dyn VideoStream>, CameraError>;
}

/// Backend for builds without camera support.
pub struct NoCamera;

impl CameraBackend for NoCamera {
	fn open(&self, _facing: Facing) -> Result<Box<dyn VideoStream>, CameraError> {
		Err(CameraError::Device(
			"this build has no camera support (enable the `camera` feature)".into(),
		))
	}
}

pub fn default_backend(cfg: &crate::config::CameraConfig) -> Arc<dyn CameraBackend> {
	#[cfg(feature = "camera")]
	{
		Arc::new(NokhwaBackend::new(cfg.user_index, cfg.environment_index))
	}
	#[cfg(not(feature = "camera"))]
	{
		let _ = cfg;
		Arc::new(NoCamera)
	}
}

/// Exclusive owner of one device stream.
pub struct StreamHandle {
	facing: Facing,
	stream: Option<Box<dyn VideoStream>>,
}

impl StreamHandle {
	pub fn open(backend: &dyn CameraBackend, facing: Facing) -> Result<Self, CameraError> {
		let stream = backend.open(facing)?;
		tracing::debug!(?facing, "camera stream acquired");
		Ok(Self {
			facing,
			stream: Some(stream),
		})
	}

	pub fn is_live(&self) -> bool {
		self.stream.is_some()
	}

	/// Snapshot the current frame. The stream keeps running.
	pub fn capture_frame(&self) -> Result<ie::OwnedImage, CameraError> {
		let stream = self
			.stream
			.as_ref()
			.ok_or_else(|| CameraError::Device("camera stream already released".into()))?;
		stream
			.latest_frame()
			.ok_or_else(|| CameraError::Device("camera has not produced a frame yet".into()))
	}

	pub fn preview(&self) -> Option<ie::OwnedImage> {
		self.stream.as_ref()?.latest_frame()
	}

	/// Stop the stream. Safe to call any number of times.
	pub fn release(&mut self) {
		if let Some(mut stream) = self.stream.take() {
			stream.stop();
			tracing::debug!(facing = ?self.facing, "camera stream released");
		}
	}
}

impl Drop for StreamHandle {
	fn drop(&mut self) {
		self.release();
	}
}

pub struct CameraSession {
	backend: Arc<dyn CameraBackend>,
	held: Option<StreamHandle>,
}

impl CameraSession {
	pub fn new(backend: Arc<dyn CameraBackend>) -> Self {
		Self { backend, held: None }
	}

	pub fn backend(&self) -> Arc<dyn CameraBackend> {
		self.backend.clone()
	}

	/// Open a stream synchronously, releasing any held one first.
	pub fn acquire(&mut self, facing: Facing) -> Result<(), CameraError> {
		self.release();
		self.held = Some(StreamHandle::open(self.backend.as_ref(), facing)?);
		Ok(())
	}

	/// Take ownership of a stream opened elsewhere, releasing any held one first.
	pub fn install(&mut self, handle: StreamHandle) {
		self.release();
		self.held = Some(handle);
	}

	/// Idempotent; a no-op when nothing is held.
	pub fn release(&mut self) {
		if let Some(mut handle) = self.held.take() {
			handle.release();
		}
	}

	pub fn is_held(&self) -> bool {
		self.held.as_ref().is_some_and(StreamHandle::is_live)
	}

	pub fn capture_frame(&self) -> Result<ie::OwnedImage, CameraError> {
		self.held
			.as_ref()
			.ok_or_else(|| CameraError::Device("no active camera stream".into()))?
			.capture_frame()
	}

	pub fn preview(&self) -> Option<ie::OwnedImage> {
		self.held.as_ref()?.preview()
	}
}

#[cfg(test)]
pub(crate) mod mock {
	use std::sync::{Arc, Mutex};

	use super::*;

	/// Records `open:<facing>` / `stop:<facing>` in order.
	#[derive(Clone, Default)]
	pub struct MockBackend {
		pub log: Arc<Mutex<Vec<String>>>,
		pub fail: Arc<Mutex<Option<String>>>,
	}

	impl MockBackend {
		pub fn events(&self) -> Vec<String> {
			self.log.lock().unwrap().clone()
		}

		pub fn count(&self, prefix: &str) -> usize {
			self.events().iter().filter(|e| e.starts_with(prefix)).count()
		}
	}

	struct MockStream {
		facing: Facing,
		log: Arc<Mutex<Vec<String>>>,
	}

	impl VideoStream for MockStream {
		fn latest_frame(&self) -> Option<ie::OwnedImage> {
			let px: [u8; 4] = match self.facing {
				Facing::User => [10, 20, 30, 255],
				Facing::Environment => [200, 100, 50, 255],
			};
			Some(ie::OwnedImage::from_rgba(4, &px.repeat(4 * 2)))
		}

		fn stop(&mut self) {
			self.log.lock().unwrap().push(format!("stop:{:?}", self.facing));
		}
	}

	impl CameraBackend for MockBackend {
		fn open(&self, facing: Facing) -> Result<Box<dyn VideoStream>, CameraError> {
			if let Some(msg) = self.fail.lock().unwrap().clone() {
				return Err(CameraError::Device(msg));
			}
			self.log.lock().unwrap().push(format!("open:{facing:?}"));
			Ok(Box::new(MockStream {
				facing,
				log: self.log.clone(),
			}))
		}
	}
}
