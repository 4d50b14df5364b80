//! nokhwa-backed camera streams.
//!
//! The device lives on its own capture thread for its whole life; the handle
//! only shares the latest decoded frame and a stop flag with it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread::JoinHandle;
use std::time::Duration;

use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};

use super::{CameraBackend, CameraError, Facing, VideoStream};

pub struct NokhwaBackend {
	user_index: u32,
	environment_index: u32,
}

impl NokhwaBackend {
	pub fn new(user_index: u32, environment_index: u32) -> Self {
		Self {
			user_index,
			environment_index,
		}
	}

	fn index(&self, facing: Facing) -> u32 {
		match facing {
			Facing::User => self.user_index,
			Facing::Environment => self.environment_index,
		}
	}
}

type Latest = Arc<Mutex<Option<ie::OwnedImage>>>;

struct NokhwaStream {
	latest: Latest,
	stop: Arc<AtomicBool>,
	worker: Option<JoinHandle<()>>,
}

impl CameraBackend for NokhwaBackend {
	fn open(&self, facing: Facing) -> Result<Box<dyn VideoStream>, CameraError> {
		let index = self.index(facing);
		let latest: Latest = Arc::new(Mutex::new(None));
		let stop = Arc::new(AtomicBool::new(false));
		let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();

		let latest_thread = latest.clone();
		let stop_thread = stop.clone();
		let worker = std::thread::Builder::new()
			.name(format!("camera-{index}"))
			.spawn(move || capture_loop(index, latest_thread, stop_thread, ready_tx))
			.map_err(|err| CameraError::Device(format!("spawn capture thread: {err}")))?;

		match ready_rx.recv() {
			Ok(Ok(())) => Ok(Box::new(NokhwaStream {
				latest,
				stop,
				worker: Some(worker),
			})),
			Ok(Err(msg)) => {
				let _ = worker.join();
				Err(CameraError::Device(msg))
			}
			Err(_) => {
				let _ = worker.join();
				Err(CameraError::Device(format!("camera {index} worker exited during startup")))
			}
		}
	}
}

fn capture_loop(index: u32, latest: Latest, stop: Arc<AtomicBool>, ready: mpsc::Sender<Result<(), String>>) {
	let format = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
	let mut camera = match nokhwa::Camera::new(CameraIndex::Index(index), format) {
		Ok(camera) => camera,
		Err(err) => {
			let _ = ready.send(Err(format!("camera {index} unavailable: {err}")));
			return;
		}
	};
	if let Err(err) = camera.open_stream() {
		let _ = ready.send(Err(format!("camera {index} could not start: {err}")));
		return;
	}
	let _ = ready.send(Ok(()));

	while !stop.load(Ordering::Relaxed) {
		let frame = camera
			.frame()
			.map_err(|err| err.to_string())
			.and_then(|buffer| buffer.decode_image::<RgbFormat>().map_err(|err| err.to_string()));
		match frame {
			Ok(rgb) => {
				if let Some(image) = ie::OwnedImage::from_rgb(rgb.width(), rgb.height(), rgb.as_raw())
					&& let Ok(mut slot) = latest.lock()
				{
					*slot = Some(image);
				}
			}
			Err(err) => {
				tracing::warn!(index, error = %err, "camera frame failed");
				std::thread::sleep(Duration::from_millis(100));
			}
		}
	}

	if let Err(err) = camera.stop_stream() {
		tracing::warn!(index, error = %err, "camera stop failed");
	}
}

impl VideoStream for NokhwaStream {
	fn latest_frame(&self) -> Option<ie::OwnedImage> {
		self.latest.lock().ok()?.clone()
	}

	fn stop(&mut self) {
		self.stop.store(true, Ordering::Relaxed);
		if let Some(worker) = self.worker.take()
			&& worker.join().is_err()
		{
			tracing::warn!("camera capture thread panicked");
		}
	}
}

impl Drop for NokhwaStream {
	fn drop(&mut self) {
		self.stop();
	}
}
