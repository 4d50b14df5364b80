//! Session state and its reducer.
//!
//! `reduce` is pure: it maps `(Session, Event)` to the next session plus the
//! effects the controller must carry out. Completion events carry the cycle
//! they were started in; a completion from any other cycle is ignored, which
//! is what keeps a reset or superseded request from touching the session.

use std::path::PathBuf;
use std::sync::Arc;

use ie::{ImageFile, Prediction};
use image::RgbaImage;

use crate::camera::Facing;
use crate::error::PipelineError;

/// Identifies one acquisition-to-render cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CycleId(u64);

impl CycleId {
	pub fn next(self) -> Self {
		Self(self.0.wrapping_add(1))
	}

	pub fn get(self) -> u64 {
		self.0
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
	#[default]
	Idle,
	/// Reading the selected file or opening the camera device.
	Acquiring,
	CameraActive,
	Capturing,
	Normalizing,
	Uploading,
	Rendering,
	Rendered,
	Error,
}

impl SessionState {
	/// States a new file or camera cycle may start from.
	pub fn can_start_cycle(self) -> bool {
		matches!(self, Self::Idle | Self::Rendered | Self::Error)
	}

	pub fn label(self) -> &'static str {
		match self {
			Self::Idle => "Idle",
			Self::Acquiring => "Acquiring",
			Self::CameraActive => "Camera active",
			Self::Capturing => "Capturing",
			Self::Normalizing => "Normalizing",
			Self::Uploading => "Uploading",
			Self::Rendering => "Rendering",
			Self::Rendered => "Rendered",
			Self::Error => "Error",
		}
	}
}

#[derive(Debug, Clone, Default)]
pub struct Session {
	pub state: SessionState,
	pub source_image: Option<Arc<RgbaImage>>,
	pub predictions: Vec<Prediction>,
	pub error_message: Option<String>,
	pub facing: Facing,
	pub cycle: CycleId,
}

impl Session {
	fn begin_cycle(&mut self, state: SessionState) -> CycleId {
		self.cycle = self.cycle.next();
		self.state = state;
		self.source_image = None;
		self.predictions = Vec::new();
		self.cycle
	}

	/// Image present only while rendering; predictions only once rendered.
	pub fn is_consistent(&self) -> bool {
		let image_ok = self.source_image.is_some()
			== matches!(self.state, SessionState::Rendering | SessionState::Rendered);
		let preds_ok = self.predictions.is_empty()
			|| matches!(self.state, SessionState::Rendering | SessionState::Rendered);
		image_ok && preds_ok
	}
}

/// Where a selected file's bytes come from.
#[derive(Debug, Clone)]
pub enum FileSource {
	Path(PathBuf),
	Loaded(ImageFile),
}

/// Classification result paired with the image it was made from.
#[derive(Debug, Clone)]
pub struct Detection {
	pub image: Arc<RgbaImage>,
	pub predictions: Vec<Prediction>,
}

#[derive(Debug)]
pub enum Event {
	FileSelected(FileSource),
	FileRead { cycle: CycleId, result: Result<ImageFile, PipelineError> },
	StartCamera,
	CameraAcquired { cycle: CycleId },
	CameraFailed { cycle: CycleId, error: PipelineError },
	ToggleFacing,
	Capture,
	FrameCaptured { cycle: CycleId, result: Result<ImageFile, PipelineError> },
	Normalized { cycle: CycleId, result: Result<ImageFile, PipelineError> },
	Classified { cycle: CycleId, result: Result<Detection, PipelineError> },
	RenderFinished { cycle: CycleId },
	Reset,
}

impl Event {
	pub fn name(&self) -> &'static str {
		match self {
			Self::FileSelected(_) => "file-selected",
			Self::FileRead { .. } => "file-read",
			Self::StartCamera => "start-camera",
			Self::CameraAcquired { .. } => "camera-acquired",
			Self::CameraFailed { .. } => "camera-failed",
			Self::ToggleFacing => "toggle-facing",
			Self::Capture => "capture",
			Self::FrameCaptured { .. } => "frame-captured",
			Self::Normalized { .. } => "normalized",
			Self::Classified { .. } => "classified",
			Self::RenderFinished { .. } => "render-finished",
			Self::Reset => "reset",
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ignored {
	/// A cycle is already in flight.
	Busy,
	/// Result of a cycle that was reset or superseded.
	StaleCycle,
	/// Event does not apply to the current state.
	InvalidState,
}

#[derive(Debug)]
pub enum Effect {
	ReadFile { cycle: CycleId, source: FileSource },
	AcquireCamera { cycle: CycleId, facing: Facing },
	ReleaseCamera,
	CaptureFrame { cycle: CycleId },
	Normalize { cycle: CycleId, file: ImageFile },
	Classify { cycle: CycleId, file: ImageFile },
	Render { cycle: CycleId },
	ClearSurface,
	Ignored(Ignored),
}

fn check(session: &Session, cycle: CycleId, state: SessionState) -> Option<Ignored> {
	if cycle != session.cycle {
		Some(Ignored::StaleCycle)
	} else if session.state != state {
		Some(Ignored::InvalidState)
	} else {
		None
	}
}

fn ignore(session: Session, why: Ignored) -> (Session, Vec<Effect>) {
	(session, vec![Effect::Ignored(why)])
}

fn fail(mut session: Session, err: PipelineError) -> (Session, Vec<Effect>) {
	session.state = SessionState::Error;
	session.error_message = Some(err.to_string());
	session.predictions = Vec::new();
	session.source_image = None;
	(session, vec![Effect::ReleaseCamera])
}

pub fn reduce(session: Session, event: Event) -> (Session, Vec<Effect>) {
	use SessionState as S;

	let mut s = session;
	match event {
		Event::Reset => {
			let next = Session {
				facing: s.facing,
				cycle: s.cycle.next(),
				..Session::default()
			};
			(next, vec![Effect::ReleaseCamera, Effect::ClearSurface])
		}

		Event::FileSelected(source) => {
			if !s.state.can_start_cycle() {
				return ignore(s, Ignored::Busy);
			}
			let cycle = s.begin_cycle(S::Acquiring);
			(s, vec![Effect::ReadFile { cycle, source }])
		}

		Event::FileRead { cycle, result } => {
			if let Some(why) = check(&s, cycle, S::Acquiring) {
				return ignore(s, why);
			}
			match result {
				Ok(file) => {
					s.state = S::Normalizing;
					(s, vec![Effect::Normalize { cycle, file }])
				}
				Err(err) => fail(s, err),
			}
		}

		Event::StartCamera => {
			if !s.state.can_start_cycle() {
				return ignore(s, Ignored::Busy);
			}
			let cycle = s.begin_cycle(S::Acquiring);
			let facing = s.facing;
			(s, vec![Effect::AcquireCamera { cycle, facing }])
		}

		Event::CameraAcquired { cycle } => {
			if let Some(why) = check(&s, cycle, S::Acquiring) {
				return ignore(s, why);
			}
			s.state = S::CameraActive;
			(s, vec![])
		}

		Event::CameraFailed { cycle, error } => {
			if let Some(why) = check(&s, cycle, S::Acquiring) {
				return ignore(s, why);
			}
			fail(s, error)
		}

		Event::ToggleFacing => match s.state {
			S::CameraActive => {
				s.facing = s.facing.opposite();
				s.state = S::Acquiring;
				let (cycle, facing) = (s.cycle, s.facing);
				(s, vec![Effect::ReleaseCamera, Effect::AcquireCamera { cycle, facing }])
			}
			state if state.can_start_cycle() => {
				s.facing = s.facing.opposite();
				(s, vec![])
			}
			_ => ignore(s, Ignored::Busy),
		},

		Event::Capture => {
			if s.state != S::CameraActive {
				return ignore(s, Ignored::InvalidState);
			}
			s.state = S::Capturing;
			let cycle = s.cycle;
			(s, vec![Effect::CaptureFrame { cycle }, Effect::ReleaseCamera])
		}

		Event::FrameCaptured { cycle, result } => {
			if let Some(why) = check(&s, cycle, S::Capturing) {
				return ignore(s, why);
			}
			match result {
				Ok(file) => {
					s.state = S::Normalizing;
					(s, vec![Effect::Normalize { cycle, file }])
				}
				Err(err) => fail(s, err),
			}
		}

		Event::Normalized { cycle, result } => {
			if let Some(why) = check(&s, cycle, S::Normalizing) {
				return ignore(s, why);
			}
			match result {
				Ok(file) => {
					s.state = S::Uploading;
					(s, vec![Effect::Classify { cycle, file }])
				}
				Err(err) => fail(s, err),
			}
		}

		Event::Classified { cycle, result } => {
			if let Some(why) = check(&s, cycle, S::Uploading) {
				return ignore(s, why);
			}
			match result {
				Ok(detection) => {
					s.state = S::Rendering;
					s.source_image = Some(detection.image);
					s.predictions = detection.predictions;
					s.error_message = None;
					(s, vec![Effect::Render { cycle }])
				}
				Err(err) => fail(s, err),
			}
		}

		Event::RenderFinished { cycle } => {
			if let Some(why) = check(&s, cycle, S::Rendering) {
				return ignore(s, why);
			}
			s.state = S::Rendered;
			(s, vec![])
		}
	}
}
