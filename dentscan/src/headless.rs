//! One-shot runs without a window: classify a file or grab a camera frame,
//! then write the rendered overlay as a PNG.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use ie::RasterSurface;

use crate::camera::Facing;
use crate::config::Config;
use crate::controller::AcquisitionController;
use crate::session::{Session, SessionState};

/// Upper bound on one whole cycle; the HTTP timeout is the real limit.
const CYCLE_SLACK: Duration = Duration::from_secs(10);

fn finished(session: &Session) -> bool {
	matches!(session.state, SessionState::Rendered | SessionState::Error)
}

fn controller(cfg: &Config) -> Result<AcquisitionController<RasterSurface>> {
	let font = crate::util::assets::load_label_font(cfg.font_path.as_deref());
	AcquisitionController::from_config(cfg, RasterSurface::new(font))
}

pub fn classify(cfg: &Config, image: &Path, out: Option<PathBuf>) -> Result<()> {
	let mut ctrl = controller(cfg)?;
	ctrl.select_file(image);
	let out = out.unwrap_or_else(|| default_output(image));
	finish(&mut ctrl, cfg, &out)
}

pub fn camera(cfg: &Config, facing: Facing, warmup: Duration, out: &Path) -> Result<()> {
	let mut ctrl = controller(cfg)?;
	if ctrl.session().facing != facing {
		ctrl.toggle_facing();
	}
	ctrl.start_camera();
	let opened = ctrl.run_until(CYCLE_SLACK, |s| {
		matches!(s.state, SessionState::CameraActive | SessionState::Error)
	});
	if !opened {
		bail!("camera did not open within {:?}", CYCLE_SLACK);
	}
	if let Some(err) = &ctrl.session().error_message {
		bail!("{err}");
	}

	// Let exposure settle before grabbing the frame.
	std::thread::sleep(warmup);
	ctrl.capture();
	finish(&mut ctrl, cfg, out)
}

fn finish(ctrl: &mut AcquisitionController<RasterSurface>, cfg: &Config, out: &Path) -> Result<()> {
	if !ctrl.run_until(cfg.request_timeout() + CYCLE_SLACK, finished) {
		bail!("gave up waiting in state {}", ctrl.session().state.label());
	}

	let session = ctrl.session();
	if session.state == SessionState::Error {
		bail!("{}", session.error_message.as_deref().unwrap_or("unknown error"));
	}

	if ie::nothing_recognized(&session.predictions) {
		println!("{}", ie::overlay::NOT_RECOGNIZED);
	}
	for prediction in &session.predictions {
		println!(
			"{}\t({:.0}, {:.0}) {:.0}x{:.0}",
			prediction.caption(),
			prediction.x,
			prediction.y,
			prediction.width,
			prediction.height
		);
	}

	ctrl.surface()
		.save_png(out)
		.with_context(|| format!("write {}", out.display()))?;
	tracing::info!(path = %out.display(), "overlay saved");
	Ok(())
}

/// `car.heic` -> `car.overlay.png` next to the input.
fn default_output(image: &Path) -> PathBuf {
	let stem = image.file_stem().and_then(|s| s.to_str()).unwrap_or("image");
	image.with_file_name(format!("{stem}.overlay.png"))
}
