//! Drives the session reducer and carries out its effects.
//!
//! Slow work (opening a device, HEIC conversion, the upload) runs on worker
//! threads that report back over a channel. The UI thread calls [`poll`] each
//! frame; headless runs block in [`wait`]. Results are only ever applied
//! through the reducer, so a completion from a reset cycle is dropped there.
//!
//! [`poll`]: AcquisitionController::poll
//! [`wait`]: AcquisitionController::wait

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ie::{HeicConverter, ImageFile, Surface};
use inference::{Classifier, InferenceClient};

use crate::camera::{CameraBackend, CameraError, CameraSession, StreamHandle};
use crate::config::{CameraConfig, Config};
use crate::error::PipelineError;
use crate::session::{reduce, CycleId, Detection, Effect, Event, FileSource, Session, SessionState};

/// Name given to frames grabbed from the camera.
pub const CAPTURE_FILE_NAME: &str = "capture.jpg";

enum Completion {
	Event(Event),
	Camera {
		cycle: CycleId,
		result: Result<StreamHandle, CameraError>,
	},
}

/// Counts a worker as outstanding until it has sent its completion.
struct Pending(Arc<AtomicUsize>);

impl Pending {
	fn start(count: &Arc<AtomicUsize>) -> Self {
		count.fetch_add(1, Ordering::SeqCst);
		Self(count.clone())
	}
}

impl Drop for Pending {
	fn drop(&mut self) {
		self.0.fetch_sub(1, Ordering::SeqCst);
	}
}

pub struct AcquisitionController<S: Surface> {
	session: Session,
	camera: CameraSession,
	classifier: Arc<dyn Classifier>,
	heic: Arc<dyn HeicConverter>,
	surface: S,
	capture: CameraConfig,

	tx: Sender<Completion>,
	rx: Receiver<Completion>,
	/// Cycle the session is on; workers skip work for any other.
	live: Arc<AtomicU64>,
	pending: Arc<AtomicUsize>,
}

impl<S: Surface> AcquisitionController<S> {
	pub fn new(
		surface: S,
		classifier: Arc<dyn Classifier>,
		camera: Arc<dyn CameraBackend>,
		heic: Arc<dyn HeicConverter>,
		capture: CameraConfig,
	) -> Self {
		let (tx, rx) = mpsc::channel();
		let session = Session::default();
		let live = Arc::new(AtomicU64::new(session.cycle.get()));
		Self {
			session,
			camera: CameraSession::new(camera),
			classifier,
			heic,
			surface,
			capture,
			tx,
			rx,
			live,
			pending: Arc::new(AtomicUsize::new(0)),
		}
	}

	/// Wire up the HTTP client, camera backend and HEIC decoder from `cfg`.
	pub fn from_config(cfg: &Config, surface: S) -> anyhow::Result<Self> {
		let client = InferenceClient::new(cfg.endpoint.clone(), cfg.request_timeout())?;
		tracing::info!(endpoint = %client.endpoint(), "detection service configured");
		Ok(Self::new(
			surface,
			Arc::new(client),
			crate::camera::default_backend(&cfg.camera),
			Arc::from(ie::default_heic_converter()),
			cfg.camera.clone(),
		))
	}

	pub fn session(&self) -> &Session {
		&self.session
	}

	pub fn surface(&self) -> &S {
		&self.surface
	}

	/// Latest live camera frame, while a stream is held.
	pub fn preview(&self) -> Option<ie::OwnedImage> {
		self.camera.preview()
	}

	pub fn camera_held(&self) -> bool {
		self.camera.is_held()
	}

	/// Something is in flight that will produce a completion.
	pub fn is_busy(&self) -> bool {
		matches!(
			self.session.state,
			SessionState::Acquiring
				| SessionState::Capturing
				| SessionState::Normalizing
				| SessionState::Uploading
				| SessionState::Rendering
		)
	}

	/// Workers still running. Their completions have not all been sent yet.
	pub fn has_pending_work(&self) -> bool {
		self.pending.load(Ordering::SeqCst) > 0
	}

	/// Returns whether a new cycle started; a busy session ignores the file.
	pub fn select_file(&mut self, path: impl Into<PathBuf>) -> bool {
		self.start_cycle(Event::FileSelected(FileSource::Path(path.into())))
	}

	/// Start a cycle from bytes already in memory (e.g. a drag & drop).
	pub fn select_loaded(&mut self, file: ImageFile) -> bool {
		self.start_cycle(Event::FileSelected(FileSource::Loaded(file)))
	}

	fn start_cycle(&mut self, event: Event) -> bool {
		let before = self.session.cycle;
		self.dispatch(event);
		self.session.cycle != before
	}

	pub fn start_camera(&mut self) {
		self.dispatch(Event::StartCamera);
	}

	pub fn toggle_facing(&mut self) {
		self.dispatch(Event::ToggleFacing);
	}

	pub fn capture(&mut self) {
		self.dispatch(Event::Capture);
	}

	pub fn reset(&mut self) {
		self.dispatch(Event::Reset);
	}

	/// Apply every completion that has already arrived. Returns whether any did.
	pub fn poll(&mut self) -> bool {
		let mut any = false;
		while let Ok(completion) = self.rx.try_recv() {
			self.complete(completion);
			any = true;
		}
		any
	}

	/// Block up to `timeout` for one completion, then drain the rest.
	pub fn wait(&mut self, timeout: Duration) -> bool {
		match self.rx.recv_timeout(timeout) {
			Ok(completion) => {
				self.complete(completion);
				self.poll();
				true
			}
			Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => false,
		}
	}

	/// Process completions until `done` holds or `timeout` elapses.
	pub fn run_until(&mut self, timeout: Duration, done: impl Fn(&Session) -> bool) -> bool {
		let deadline = Instant::now() + timeout;
		self.poll();
		while !done(&self.session) {
			let remaining = deadline.saturating_duration_since(Instant::now());
			if remaining.is_zero() {
				return false;
			}
			self.wait(remaining);
		}
		true
	}

	fn complete(&mut self, completion: Completion) {
		match completion {
			Completion::Event(event) => self.dispatch(event),
			Completion::Camera { cycle, result } => match result {
				Ok(handle) => {
					if cycle == self.session.cycle && self.session.state == SessionState::Acquiring {
						self.camera.install(handle);
						self.dispatch(Event::CameraAcquired { cycle });
					} else {
						tracing::debug!(cycle = cycle.get(), "releasing camera opened for a stale cycle");
						drop(handle);
					}
				}
				Err(err) => self.dispatch(Event::CameraFailed {
					cycle,
					error: err.into(),
				}),
			},
		}
	}

	fn dispatch(&mut self, event: Event) {
		let mut queue = VecDeque::from([event]);
		while let Some(event) = queue.pop_front() {
			let name = event.name();
			let (next, effects) = reduce(std::mem::take(&mut self.session), event);
			self.session = next;
			self.live.store(self.session.cycle.get(), Ordering::SeqCst);
			tracing::debug!(event = name, state = ?self.session.state, cycle = self.session.cycle.get(), "session step");

			for effect in effects {
				if let Some(event) = self.run(effect) {
					queue.push_back(event);
				}
			}
		}
	}

	fn run(&mut self, effect: Effect) -> Option<Event> {
		match effect {
			Effect::ReadFile { cycle, source } => {
				let result = match source {
					FileSource::Path(path) => ImageFile::from_path(&path)
						.map_err(|err| PipelineError::Read(format!("{}: {err}", path.display()))),
					FileSource::Loaded(file) => Ok(file),
				};
				if let Ok(file) = &result {
					tracing::info!(cycle = cycle.get(), file = %file.name, mime = %file.mime, "image selected");
				}
				Some(Event::FileRead { cycle, result })
			}

			Effect::AcquireCamera { cycle, facing } => {
				let backend = self.camera.backend();
				let (tx, live) = (self.tx.clone(), self.live.clone());
				let pending = Pending::start(&self.pending);
				std::thread::spawn(move || {
					let _pending = pending;
					if live.load(Ordering::SeqCst) != cycle.get() {
						return;
					}
					let result = StreamHandle::open(backend.as_ref(), facing);
					if result.is_ok() && live.load(Ordering::SeqCst) != cycle.get() {
						// Reset while the device was opening: release it here.
						tracing::debug!(cycle = cycle.get(), "releasing camera opened for a stale cycle");
						return;
					}
					let _ = tx.send(Completion::Camera { cycle, result });
				});
				None
			}

			Effect::ReleaseCamera => {
				self.camera.release();
				None
			}

			Effect::CaptureFrame { cycle } => Some(Event::FrameCaptured {
				cycle,
				result: self.grab_frame(),
			}),

			Effect::Normalize { cycle, file } => {
				let heic = self.heic.clone();
				let tx = self.tx.clone();
				let pending = Pending::start(&self.pending);
				std::thread::spawn(move || {
					let _pending = pending;
					let result = ie::normalize(file, heic.as_ref()).map_err(PipelineError::from);
					let _ = tx.send(Completion::Event(Event::Normalized { cycle, result }));
				});
				None
			}

			Effect::Classify { cycle, file } => {
				let classifier = self.classifier.clone();
				let (tx, live) = (self.tx.clone(), self.live.clone());
				let pending = Pending::start(&self.pending);
				std::thread::spawn(move || {
					let _pending = pending;
					if live.load(Ordering::SeqCst) != cycle.get() {
						return;
					}
					let result = detect(classifier.as_ref(), &file);
					match &result {
						Ok(detection) => {
							tracing::info!(cycle = cycle.get(), predictions = detection.predictions.len(), "classified")
						}
						Err(err) => tracing::warn!(cycle = cycle.get(), error = %err, "classification failed"),
					}
					let _ = tx.send(Completion::Event(Event::Classified { cycle, result }));
				});
				None
			}

			Effect::Render { cycle } => {
				if let Some(image) = &self.session.source_image {
					ie::render(&mut self.surface, image, &self.session.predictions);
				}
				Some(Event::RenderFinished { cycle })
			}

			Effect::ClearSurface => {
				self.surface.resize(0, 0);
				None
			}

			Effect::Ignored(why) => {
				tracing::debug!(?why, state = ?self.session.state, "event ignored");
				None
			}
		}
	}

	/// Snapshot the held stream as a JPEG upload.
	fn grab_frame(&self) -> Result<ImageFile, PipelineError> {
		let frame = self.camera.capture_frame()?;
		let frame = frame
			.capped_h(self.capture.max_frame_height)
			.map_err(|err| PipelineError::Device(format!("{err:#}")))?;
		let jpeg = frame
			.encode_jpeg(self.capture.jpeg_quality)
			.map_err(|err| PipelineError::Device(format!("{err:#}")))?;
		tracing::info!(width = frame.width(), height = frame.height(), bytes = jpeg.len(), "frame captured");
		Ok(ImageFile::new(CAPTURE_FILE_NAME, "image/jpeg", jpeg))
	}
}

fn detect(classifier: &dyn Classifier, file: &ImageFile) -> Result<Detection, PipelineError> {
	let predictions = classifier.classify(file)?;
	let image = image::load_from_memory(&file.bytes)
		.map_err(|err| PipelineError::UnsupportedFormat(format!("{}: {err}", file.name)))?
		.to_rgba8();
	Ok(Detection {
		image: Arc::new(image),
		predictions,
	})
}

#[cfg(test)]
mod tests {
	use std::io::Cursor;
	use std::sync::atomic::AtomicUsize;
	use std::sync::Mutex;

	use ie::{NoHeicSupport, Prediction, RasterSurface};
	use image::{Rgba, RgbaImage};
	use inference::InferenceError;

	use super::*;
	use crate::camera::mock::MockBackend;
	use crate::camera::Facing;

	const SETTLE: Duration = Duration::from_secs(5);
	const GRAY: Rgba<u8> = Rgba([128, 128, 128, 255]);

	type Reply = Box<dyn Fn() -> Result<Vec<Prediction>, InferenceError> + Send + Sync>;

	/// Canned detection service. With a gate, each call announces itself and
	/// blocks until released.
	struct FakeService {
		reply: Reply,
		calls: AtomicUsize,
		seen: Mutex<Vec<String>>,
		gate: Option<(Mutex<Sender<()>>, Mutex<Receiver<()>>)>,
	}

	impl FakeService {
		fn new(reply: impl Fn() -> Result<Vec<Prediction>, InferenceError> + Send + Sync + 'static) -> Self {
			Self {
				reply: Box::new(reply),
				calls: AtomicUsize::new(0),
				seen: Mutex::new(Vec::new()),
				gate: None,
			}
		}

		/// Returns (service, entered, release).
		fn gated(
			reply: impl Fn() -> Result<Vec<Prediction>, InferenceError> + Send + Sync + 'static,
		) -> (Self, Receiver<()>, Sender<()>) {
			let (entered_tx, entered_rx) = mpsc::channel();
			let (release_tx, release_rx) = mpsc::channel();
			let mut service = Self::new(reply);
			service.gate = Some((Mutex::new(entered_tx), Mutex::new(release_rx)));
			(service, entered_rx, release_tx)
		}

		fn calls(&self) -> usize {
			self.calls.load(Ordering::SeqCst)
		}
	}

	impl Classifier for FakeService {
		fn classify(&self, file: &ImageFile) -> Result<Vec<Prediction>, InferenceError> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			self.seen.lock().unwrap().push(file.name.clone());
			if let Some((entered, release)) = &self.gate {
				entered.lock().unwrap().send(()).unwrap();
				release.lock().unwrap().recv().unwrap();
			}
			(self.reply)()
		}
	}

	fn dent() -> Prediction {
		Prediction {
			x: 100.0,
			y: 50.0,
			width: 40.0,
			height: 20.0,
			label: "dent".into(),
			confidence: 0.91,
		}
	}

	fn gray_png() -> Vec<u8> {
		let image = RgbaImage::from_pixel(200, 100, GRAY);
		let mut bytes = Vec::new();
		image::DynamicImage::ImageRgba8(image)
			.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
			.unwrap();
		bytes
	}

	fn controller(
		service: Arc<FakeService>,
		backend: MockBackend,
	) -> AcquisitionController<RasterSurface> {
		AcquisitionController::new(
			RasterSurface::new(None),
			service,
			Arc::new(backend),
			Arc::new(NoHeicSupport),
			CameraConfig::default(),
		)
	}

	fn state_is(state: SessionState) -> impl Fn(&Session) -> bool {
		move |s: &Session| s.state == state
	}

	#[test]
	fn dent_photo_renders_box_over_image() {
		let dir = std::env::temp_dir().join(format!("dentscan-ctrl-{}", std::process::id()));
		std::fs::create_dir_all(&dir).unwrap();
		let path = dir.join("car.png");
		std::fs::write(&path, gray_png()).unwrap();

		let service = Arc::new(FakeService::new(|| Ok(vec![dent()])));
		let mut ctrl = controller(service.clone(), MockBackend::default());
		ctrl.select_file(&path);
		assert!(ctrl.run_until(SETTLE, state_is(SessionState::Rendered)));

		let session = ctrl.session();
		assert_eq!(session.predictions, vec![dent()]);
		assert!(session.error_message.is_none());
		assert_eq!(service.seen.lock().unwrap().as_slice(), ["car.png"]);

		let canvas = ctrl.surface().canvas();
		assert_eq!(canvas.dimensions(), (200, 100));
		// Box centered at (100, 50): left edge covers x=79..=80.
		assert_ne!(*canvas.get_pixel(80, 50), GRAY);
		assert_ne!(*canvas.get_pixel(79, 50), GRAY);
		assert_eq!(*canvas.get_pixel(100, 50), GRAY);
		assert_eq!(*canvas.get_pixel(122, 50), GRAY);
		assert_eq!(*canvas.get_pixel(10, 10), GRAY);

		std::fs::remove_dir_all(&dir).unwrap();
	}

	#[test]
	fn missing_file_is_a_read_error() {
		let service = Arc::new(FakeService::new(|| Ok(vec![])));
		let mut ctrl = controller(service.clone(), MockBackend::default());
		ctrl.select_file("/definitely/not/here.jpg");
		assert!(ctrl.run_until(SETTLE, state_is(SessionState::Error)));
		let message = ctrl.session().error_message.clone().unwrap_or_default();
		assert!(message.starts_with("Could not read file"), "{message}");
		assert_eq!(service.calls(), 0);
	}

	#[test]
	fn service_error_shows_message_and_no_predictions() {
		let service = Arc::new(FakeService::new(|| {
			Err(InferenceError::Service {
				status: 500,
				detail: "internal error".into(),
			})
		}));
		let mut ctrl = controller(service, MockBackend::default());
		ctrl.select_loaded(ImageFile::new("car.png", "image/png", gray_png()));
		assert!(ctrl.run_until(SETTLE, state_is(SessionState::Error)));

		let session = ctrl.session();
		assert!(session.predictions.is_empty());
		assert_eq!(
			session.error_message.as_deref(),
			Some("Detection service error (500): internal error")
		);
	}

	#[test]
	fn heic_without_decoder_never_uploads() {
		let service = Arc::new(FakeService::new(|| Ok(vec![dent()])));
		let mut ctrl = controller(service.clone(), MockBackend::default());
		ctrl.select_loaded(ImageFile::new("IMG_0001.HEIC", "image/heic", vec![0; 32]));
		assert!(ctrl.run_until(SETTLE, state_is(SessionState::Error)));

		let message = ctrl.session().error_message.clone().unwrap_or_default();
		assert!(message.starts_with("Unsupported image"), "{message}");
		assert_eq!(service.calls(), 0);
	}

	#[test]
	fn reset_while_uploading_discards_late_result() {
		let (service, entered, release) = FakeService::gated(|| Ok(vec![dent()]));
		let service = Arc::new(service);
		let mut ctrl = controller(service.clone(), MockBackend::default());

		ctrl.select_loaded(ImageFile::new("car.png", "image/png", gray_png()));
		assert!(ctrl.run_until(SETTLE, state_is(SessionState::Uploading)));
		entered.recv_timeout(SETTLE).unwrap();

		ctrl.reset();
		assert_eq!(ctrl.session().state, SessionState::Idle);

		release.send(()).unwrap();
		assert!(ctrl.wait(SETTLE));

		let session = ctrl.session();
		assert_eq!(session.state, SessionState::Idle);
		assert!(session.predictions.is_empty());
		assert!(session.source_image.is_none());
		assert_eq!(ctrl.surface().dimensions(), (0, 0));
	}

	#[test]
	fn second_file_while_uploading_is_rejected() {
		let (service, entered, release) = FakeService::gated(|| Ok(vec![]));
		let service = Arc::new(service);
		let mut ctrl = controller(service.clone(), MockBackend::default());

		ctrl.select_loaded(ImageFile::new("a.png", "image/png", gray_png()));
		assert!(ctrl.run_until(SETTLE, state_is(SessionState::Uploading)));
		entered.recv_timeout(SETTLE).unwrap();
		let cycle = ctrl.session().cycle;

		assert!(!ctrl.select_loaded(ImageFile::new("b.png", "image/png", gray_png())));
		assert_eq!(ctrl.session().state, SessionState::Uploading);
		assert_eq!(ctrl.session().cycle, cycle);

		release.send(()).unwrap();
		assert!(ctrl.run_until(SETTLE, state_is(SessionState::Rendered)));
		assert_eq!(service.calls(), 1);
	}

	#[test]
	fn camera_capture_flow_releases_every_stream() {
		let backend = MockBackend::default();
		let service = Arc::new(FakeService::new(|| Ok(vec![])));
		let mut ctrl = controller(service.clone(), backend.clone());

		ctrl.start_camera();
		assert!(ctrl.run_until(SETTLE, state_is(SessionState::CameraActive)));
		assert!(ctrl.camera_held());
		assert!(ctrl.preview().is_some());

		ctrl.toggle_facing();
		assert!(ctrl.run_until(SETTLE, state_is(SessionState::CameraActive)));
		assert_eq!(ctrl.session().facing, Facing::User);
		assert_eq!(backend.events(), ["open:Environment", "stop:Environment", "open:User"]);

		ctrl.capture();
		assert!(!ctrl.camera_held());
		assert!(ctrl.run_until(SETTLE, state_is(SessionState::Rendered)));

		assert_eq!(service.seen.lock().unwrap().as_slice(), [CAPTURE_FILE_NAME]);
		assert_eq!(ctrl.surface().dimensions(), (4, 2));
		assert_eq!(backend.count("open:"), backend.count("stop:"));
	}

	#[test]
	fn camera_failure_is_a_device_error() {
		let backend = MockBackend::default();
		*backend.fail.lock().unwrap() = Some("permission denied".into());
		let mut ctrl = controller(Arc::new(FakeService::new(|| Ok(vec![]))), backend);

		ctrl.start_camera();
		assert!(ctrl.run_until(SETTLE, state_is(SessionState::Error)));
		assert_eq!(
			ctrl.session().error_message.as_deref(),
			Some("Camera error: permission denied")
		);
		assert!(!ctrl.camera_held());
	}

	#[test]
	fn reset_during_camera_leaves_no_stream_open() {
		let backend = MockBackend::default();
		let mut ctrl = controller(Arc::new(FakeService::new(|| Ok(vec![]))), backend.clone());

		ctrl.start_camera();
		assert!(ctrl.run_until(SETTLE, state_is(SessionState::CameraActive)));
		ctrl.reset();
		assert!(!ctrl.camera_held());
		assert_eq!(ctrl.session().state, SessionState::Idle);

		// A reset racing the open: the late handle is released on arrival.
		ctrl.start_camera();
		ctrl.reset();
		ctrl.wait(Duration::from_secs(1));
		assert!(!ctrl.camera_held());
		assert_eq!(backend.count("open:"), backend.count("stop:"));
	}

	/// Announces each open, then takes a while before the device is ready.
	struct SlowBackend {
		inner: MockBackend,
		entered: Mutex<Sender<()>>,
	}

	impl CameraBackend for SlowBackend {
		fn open(&self, facing: Facing) -> Result<Box<dyn crate::camera::VideoStream>, CameraError> {
			self.entered.lock().unwrap().send(()).unwrap();
			std::thread::sleep(Duration::from_millis(200));
			self.inner.open(facing)
		}
	}

	#[test]
	fn reset_while_device_opens_releases_it_without_polling() {
		let inner = MockBackend::default();
		let (entered_tx, entered_rx) = mpsc::channel();
		let backend = SlowBackend {
			inner: inner.clone(),
			entered: Mutex::new(entered_tx),
		};
		let mut ctrl = AcquisitionController::new(
			RasterSurface::new(None),
			Arc::new(FakeService::new(|| Ok(vec![]))),
			Arc::new(backend),
			Arc::new(NoHeicSupport),
			CameraConfig::default(),
		);

		ctrl.start_camera();
		assert!(ctrl.has_pending_work());
		entered_rx.recv_timeout(SETTLE).unwrap();
		ctrl.reset();

		// No poll: the worker itself must let go of the device.
		let deadline = Instant::now() + SETTLE;
		while ctrl.has_pending_work() && Instant::now() < deadline {
			std::thread::sleep(Duration::from_millis(10));
		}
		assert!(!ctrl.has_pending_work());
		assert_eq!(inner.events(), ["open:Environment", "stop:Environment"]);
		assert!(!ctrl.poll());
		assert!(!ctrl.camera_held());
	}

	#[test]
	fn reset_after_render_clears_everything() {
		let service = Arc::new(FakeService::new(|| Ok(vec![dent()])));
		let mut ctrl = controller(service, MockBackend::default());
		ctrl.toggle_facing();
		ctrl.select_loaded(ImageFile::new("car.png", "image/png", gray_png()));
		assert!(ctrl.run_until(SETTLE, state_is(SessionState::Rendered)));

		ctrl.reset();
		let session = ctrl.session();
		assert_eq!(session.state, SessionState::Idle);
		assert!(session.predictions.is_empty());
		assert!(session.source_image.is_none());
		assert!(session.error_message.is_none());
		assert_eq!(session.facing, Facing::User);
		assert_eq!(ctrl.surface().dimensions(), (0, 0));
	}
}
