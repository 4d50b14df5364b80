use std::path::PathBuf;
use std::time::Duration;

use ie::{ImageFile, RasterSurface, Surface};

use crate::config::Config;
use crate::controller::AcquisitionController;
use crate::session::{CycleId, SessionState};

mod settings;

const FRAME_INTERVAL: Duration = Duration::from_millis(33);

pub fn run(config: Config) -> anyhow::Result<()> {
	let font = crate::util::assets::load_label_font(config.font_path.as_deref());
	let ctrl = AcquisitionController::from_config(&config, RasterSurface::new(font))?;

	let options = eframe::NativeOptions {
		viewport: egui::ViewportBuilder::default()
			.with_inner_size([1100.0, 760.0])
			.with_drag_and_drop(true),
		..Default::default()
	};
	eframe::run_native(
		"dentscan",
		options,
		Box::new(move |_cc| Ok(Box::new(DentScan::new(config, ctrl)))),
	)
	.map_err(|err| anyhow::anyhow!("gui: {err}"))
}

pub struct DentScan {
	ctrl: AcquisitionController<RasterSurface>,
	settings: settings::Settings,

	path_input: String,
	save_input: String,
	status: Option<String>,

	overlay: Option<egui::TextureHandle>,
	overlay_cycle: Option<CycleId>,
	preview: Option<egui::TextureHandle>,
}

impl DentScan {
	fn new(config: Config, ctrl: AcquisitionController<RasterSurface>) -> Self {
		Self {
			ctrl,
			settings: settings::Settings::new(config),
			path_input: String::new(),
			save_input: "overlay.png".to_string(),
			status: None,
			overlay: None,
			overlay_cycle: None,
			preview: None,
		}
	}

	fn take_dropped_files(&mut self, ctx: &egui::Context) {
		let dropped = ctx.input(|i| i.raw.dropped_files.clone());
		let Some(file) = dropped.into_iter().next() else {
			return;
		};
		if let Some(path) = file.path {
			let shown = path.display().to_string();
			if self.ctrl.select_file(path) {
				self.path_input = shown;
			}
		} else if let Some(bytes) = file.bytes {
			let mime = if file.mime.is_empty() {
				ie::mime_from_extension(std::path::Path::new(&file.name)).to_string()
			} else {
				file.mime
			};
			self.ctrl.select_loaded(ImageFile::new(file.name, mime, bytes.to_vec()));
		}
	}

	/// Upload the rendered canvas once per cycle; drop it when the surface is cleared.
	fn sync_overlay(&mut self, ctx: &egui::Context) {
		let (width, height) = self.ctrl.surface().dimensions();
		if width == 0 || height == 0 {
			self.overlay = None;
			self.overlay_cycle = None;
			return;
		}
		let session = self.ctrl.session();
		if session.state == SessionState::Rendered && self.overlay_cycle != Some(session.cycle) {
			let canvas = self.ctrl.surface().canvas();
			let image = egui::ColorImage::from_rgba_unmultiplied([width as usize, height as usize], canvas.as_raw());
			self.overlay = Some(ctx.load_texture("overlay", image, egui::TextureOptions::LINEAR));
			self.overlay_cycle = Some(session.cycle);
		}
	}

	fn sync_preview(&mut self, ctx: &egui::Context) {
		let Some(frame) = self.ctrl.preview() else {
			self.preview = None;
			return;
		};
		let size = [frame.width() as usize, frame.height() as usize];
		let image = egui::ColorImage::from_rgb(size, &frame.get_bytes());
		match &mut self.preview {
			Some(texture) => texture.set(image, egui::TextureOptions::LINEAR),
			None => self.preview = Some(ctx.load_texture("camera-preview", image, egui::TextureOptions::LINEAR)),
		}
	}

	fn ui_controls(&mut self, ui: &mut egui::Ui) {
		let state = self.ctrl.session().state;
		let can_start = state.can_start_cycle();

		ui.label("Image file");
		ui.horizontal(|ui| {
			ui.text_edit_singleline(&mut self.path_input);
			let ready = can_start && !self.path_input.trim().is_empty();
			if ui.add_enabled(ready, egui::Button::new("Classify")).clicked() {
				self.ctrl.select_file(PathBuf::from(self.path_input.trim()));
			}
		});
		ui.small("or drop a photo onto the window");

		ui.separator();
		ui.horizontal(|ui| {
			if ui.add_enabled(can_start, egui::Button::new("Start camera")).clicked() {
				self.ctrl.start_camera();
			}
			let can_switch = can_start || state == SessionState::CameraActive;
			if ui.add_enabled(can_switch, egui::Button::new("Switch camera")).clicked() {
				self.ctrl.toggle_facing();
			}
			if ui
				.add_enabled(state == SessionState::CameraActive, egui::Button::new("Capture"))
				.clicked()
			{
				self.ctrl.capture();
			}
			if ui.button("Reset").clicked() {
				self.ctrl.reset();
				self.status = None;
			}
		});
		ui.label(format!("Camera: {:?}", self.ctrl.session().facing));

		ui.separator();
		ui.horizontal(|ui| {
			ui.label(state.label());
			if self.ctrl.is_busy() {
				ui.spinner();
			}
		});
		if let Some(err) = &self.ctrl.session().error_message {
			ui.colored_label(egui::Color32::RED, err);
		}

		let predictions = &self.ctrl.session().predictions;
		if state == SessionState::Rendered {
			ui.add_space(6.0);
			if ie::nothing_recognized(predictions) {
				ui.label(ie::overlay::NOT_RECOGNIZED);
			}
			for prediction in predictions {
				ui.label(prediction.caption());
			}
		}

		ui.separator();
		ui.horizontal(|ui| {
			ui.text_edit_singleline(&mut self.save_input);
			if ui.add_enabled(self.overlay.is_some(), egui::Button::new("Save PNG")).clicked() {
				let path = PathBuf::from(self.save_input.trim());
				self.status = Some(match self.ctrl.surface().save_png(&path) {
					Ok(()) => format!("Saved {}", path.display()),
					Err(err) => format!("{err:#}"),
				});
			}
		});
		if let Some(status) = &self.status {
			ui.small(status);
		}
	}

	fn ui_canvas(&self, ui: &mut egui::Ui) {
		let texture = if self.ctrl.camera_held() {
			self.preview.as_ref()
		} else {
			self.overlay.as_ref()
		};
		match texture {
			Some(texture) => {
				ui.centered_and_justified(|ui| {
					ui.add(egui::Image::new(texture).shrink_to_fit());
				});
			}
			None => {
				ui.centered_and_justified(|ui| {
					ui.weak("No image yet");
				});
			}
		}
	}
}

impl eframe::App for DentScan {
	fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
		// Read before draining: a worker counted here has either delivered already
		// or gets another frame to do so.
		let pending = self.ctrl.has_pending_work();
		self.ctrl.poll();
		self.take_dropped_files(ctx);
		self.sync_overlay(ctx);
		self.sync_preview(ctx);

		egui::TopBottomPanel::top("title").show(ctx, |ui| {
			ui.horizontal(|ui| {
				ui.heading("Vehicle damage detection");
				ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
					if ui.small_button("⚙").clicked() {
						self.settings.toggle();
					}
				});
			});
		});

		egui::SidePanel::left("controls")
			.resizable(true)
			.default_width(340.0)
			.show(ctx, |ui| self.ui_controls(ui));

		egui::CentralPanel::default().show(ctx, |ui| self.ui_canvas(ui));

		self.settings.show(ctx);

		if pending || self.ctrl.has_pending_work() || self.ctrl.is_busy() || self.ctrl.camera_held() {
			ctx.request_repaint_after(FRAME_INTERVAL);
		}
	}
}
