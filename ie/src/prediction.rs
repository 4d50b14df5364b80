/// Confidence below which a detection does not count as recognized.
pub const CONFIDENCE_THRESHOLD: f64 = 0.60;

/// One labeled detection returned by the inference service.
///
/// `(x, y)` is the **center** of the box, not a corner.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Prediction {
	pub x: f64,
	pub y: f64,
	pub width: f64,
	pub height: f64,
	pub label: String,
	pub confidence: f64,
}

impl Prediction {
	/// Top-left corner of the box.
	pub fn top_left(&self) -> (f64, f64) {
		(self.x - self.width / 2.0, self.y - self.height / 2.0)
	}

	/// `"{label} {confidence%}"`, rounded to the nearest percent.
	pub fn caption(&self) -> String {
		format!("{} {}%", self.label, (self.confidence * 100.0).round() as i64)
	}

	pub fn is_confident(&self) -> bool {
		self.confidence >= CONFIDENCE_THRESHOLD
	}
}

/// True when nothing in `predictions` clears [`CONFIDENCE_THRESHOLD`].
pub fn nothing_recognized(predictions: &[Prediction]) -> bool {
	!predictions.iter().any(Prediction::is_confident)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn dent(confidence: f64) -> Prediction {
		Prediction {
			x: 100.0,
			y: 50.0,
			width: 40.0,
			height: 20.0,
			label: "dent".into(),
			confidence,
		}
	}

	#[test]
	fn center_to_corner() {
		assert_eq!(dent(0.91).top_left(), (80.0, 40.0));
	}

	#[test]
	fn caption_rounds_percent() {
		assert_eq!(dent(0.91).caption(), "dent 91%");
		assert_eq!(dent(0.125).caption(), "dent 13%");
		assert_eq!(dent(0.0).caption(), "dent 0%");
	}

	#[test]
	fn threshold_is_inclusive() {
		assert!(dent(0.60).is_confident());
		assert!(!dent(0.599).is_confident());
		assert!(nothing_recognized(&[]));
		assert!(nothing_recognized(&[dent(0.2), dent(0.59)]));
		assert!(!nothing_recognized(&[dent(0.2), dent(0.6)]));
	}
}
