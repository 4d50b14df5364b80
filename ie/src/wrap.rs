//! Greedy word wrapping against measured text width.

/// One committed line of wrapped text, positioned at its top-left corner.
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
	pub text: String,
	pub x: f32,
	pub y: f32,
}

/// Lay out `text` starting at `(x, y)`, breaking lines so each stays within
/// `max_width` as reported by `measure`.
///
/// Tokens are never split: a single token wider than `max_width` gets a line of
/// its own and overflows.
pub fn wrap_text(
	text: &str,
	x: f32,
	mut y: f32,
	max_width: f32,
	line_height: f32,
	measure: impl Fn(&str) -> f32,
) -> Vec<Line> {
	let mut lines = Vec::new();
	let mut line = String::new();

	for token in text.split_whitespace() {
		let candidate = format!("{line}{token} ");
		if measure(&candidate) > max_width && !line.is_empty() {
			lines.push(Line {
				text: line.trim_end().to_string(),
				x,
				y,
			});
			line = format!("{token} ");
			y += line_height;
		} else {
			line = candidate;
		}
	}

	if !line.is_empty() {
		lines.push(Line {
			text: line.trim_end().to_string(),
			x,
			y,
		});
	}
	lines
}
