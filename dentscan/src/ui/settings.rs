use std::path::PathBuf;

use crate::config::Config;

/// Settings window. Edits are saved immediately and take effect on restart.
pub struct Settings {
	config: Config,
	open: bool,
	font_input: String,
	status: Option<String>,
}

impl Settings {
	pub fn new(config: Config) -> Self {
		let font_input = config
			.font_path
			.as_ref()
			.map(|p| p.display().to_string())
			.unwrap_or_default();
		Self {
			config,
			open: false,
			font_input,
			status: None,
		}
	}

	pub fn toggle(&mut self) {
		self.open = !self.open;
	}

	pub fn show(&mut self, ctx: &egui::Context) {
		let mut open = self.open;
		egui::Window::new("Settings")
			.open(&mut open)
			.default_size([420.0, 360.0])
			.show(ctx, |ui| self.ui(ui));
		self.open = open;
	}

	fn ui(&mut self, ui: &mut egui::Ui) {
		let config = &mut self.config;
		let mut changed = false;

		ui.label("Detection service URL");
		changed |= ui.text_edit_singleline(&mut config.endpoint).changed();
		ui.horizontal(|ui| {
			ui.label("Request timeout");
			changed |= ui
				.add(
					egui::DragValue::new(&mut config.request_timeout_s)
						.range(1.0..=600.0)
						.suffix(" s"),
				)
				.changed();
		});

		ui.separator();
		ui.label("Label font (.ttf, empty = search)");
		if ui.text_edit_singleline(&mut self.font_input).changed() {
			let trimmed = self.font_input.trim();
			config.font_path = (!trimmed.is_empty()).then(|| PathBuf::from(trimmed));
			changed = true;
		}

		ui.separator();
		ui.label("Camera");
		ui.horizontal(|ui| {
			ui.label("User-facing device");
			changed |= ui.add(egui::DragValue::new(&mut config.camera.user_index).range(0..=16)).changed();
		});
		ui.horizontal(|ui| {
			ui.label("Environment-facing device");
			changed |= ui
				.add(egui::DragValue::new(&mut config.camera.environment_index).range(0..=16))
				.changed();
		});
		ui.horizontal(|ui| {
			let mut capped = config.camera.max_frame_height.is_some();
			if ui.checkbox(&mut capped, "Max frame height").changed() {
				config.camera.max_frame_height = capped.then_some(1080);
				changed = true;
			}
			if let Some(height) = &mut config.camera.max_frame_height {
				changed |= ui.add(egui::DragValue::new(height).range(120..=4320)).changed();
			}
		});
		ui.horizontal(|ui| {
			ui.label("JPEG quality");
			changed |= ui
				.add(egui::Slider::new(&mut config.camera.jpeg_quality, 1..=100))
				.changed();
		});

		if changed {
			self.status = Some(match config.save() {
				Ok(()) => "Saved. Restart to apply.".to_string(),
				Err(err) => {
					tracing::warn!(error = %format!("{err:#}"), "failed to save config");
					format!("{err:#}")
				}
			});
		}
		if let Some(status) = &self.status {
			ui.small(status);
		}
	}
}
