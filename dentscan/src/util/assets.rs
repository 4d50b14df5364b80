use std::path::{Path, PathBuf};

use anyhow::{Result, bail};

const FONT_NAMES: &[&str] = &["DejaVuSans-Bold.ttf", "LiberationSans-Bold.ttf", "Arial Bold.ttf", "arialbd.ttf"];

const SYSTEM_FONTS: &[&str] = &[
	"/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
	"/usr/share/fonts/TTF/DejaVuSans-Bold.ttf",
	"/usr/share/fonts/dejavu/DejaVuSans-Bold.ttf",
	"/usr/share/fonts/truetype/liberation/LiberationSans-Bold.ttf",
	"/System/Library/Fonts/Supplemental/Arial Bold.ttf",
	"/Library/Fonts/Arial Bold.ttf",
	"C:\\Windows\\Fonts\\arialbd.ttf",
];

/// Resolve the overlay label font.
///
/// Order: explicit config path, `DENTSCAN_FONT`, a `fonts/` folder next to the
/// executable or in the working directory, then common system locations.
pub fn resolve_font(configured: Option<&Path>) -> Result<PathBuf> {
	let mut candidates: Vec<PathBuf> = Vec::new();
	if let Some(path) = configured {
		candidates.push(path.to_path_buf());
	}
	if let Some(path) = std::env::var_os("DENTSCAN_FONT") {
		candidates.push(PathBuf::from(path));
	}

	let mut dirs = Vec::new();
	if let Ok(exe) = std::env::current_exe()
		&& let Some(dir) = exe.parent()
	{
		dirs.push(dir.join("fonts"));
	}
	if let Ok(cwd) = std::env::current_dir() {
		dirs.push(cwd.join("fonts"));
	}
	for dir in dirs {
		candidates.extend(FONT_NAMES.iter().map(|name| dir.join(name)));
	}
	candidates.extend(SYSTEM_FONTS.iter().map(PathBuf::from));

	if let Some(found) = candidates.iter().find(|p| p.is_file()) {
		return Ok(found.clone());
	}

	bail!(
		"No label font found. Searched:\n{}\n\nFix: set `font_path` in the config or DENTSCAN_FONT to a .ttf file.",
		candidates
			.iter()
			.map(|p| format!("  - {}", p.display()))
			.collect::<Vec<_>>()
			.join("\n")
	)
}

/// Load the label font, logging instead of failing so overlays still render boxes.
pub fn load_label_font(configured: Option<&Path>) -> Option<ie::FontArc> {
	let path = match resolve_font(configured) {
		Ok(path) => path,
		Err(err) => {
			tracing::warn!("{err:#}");
			return None;
		}
	};
	match ie::load_font(&path) {
		Ok(font) => {
			tracing::debug!(path = %path.display(), "loaded label font");
			Some(font)
		}
		Err(err) => {
			tracing::warn!(error = %format!("{err:#}"), "failed to load label font");
			None
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn configured_path_wins() {
		let path = std::env::temp_dir().join(format!("dentscan-font-{}.ttf", std::process::id()));
		std::fs::write(&path, b"not really a font").unwrap();
		assert_eq!(resolve_font(Some(&path)).unwrap(), path);
		std::fs::remove_file(&path).unwrap();
	}
}
