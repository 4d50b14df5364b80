use serde::Deserialize;

/// Body of a successful `POST /predict/`.
#[derive(Deserialize)]
pub struct PredictResponse {
	pub predictions: Vec<ie::Prediction>,
}

/// Parse and validate a response body.
///
/// Serde already rejects missing or non-numeric fields; this also rejects
/// non-finite numbers, negative sizes and confidences outside `[0, 1]`.
pub fn parse_predictions(body: &[u8]) -> Result<Vec<ie::Prediction>, String> {
	let response: PredictResponse = serde_json::from_slice(body).map_err(|err| err.to_string())?;

	for (i, p) in response.predictions.iter().enumerate() {
		if ![p.x, p.y, p.width, p.height, p.confidence].iter().all(|v| v.is_finite()) {
			return Err(format!("prediction {i}: non-finite number"));
		}
		if p.width < 0.0 || p.height < 0.0 {
			return Err(format!("prediction {i}: negative box size"));
		}
		if !(0.0..=1.0).contains(&p.confidence) {
			return Err(format!("prediction {i}: confidence {} outside [0, 1]", p.confidence));
		}
	}

	Ok(response.predictions)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_prediction_list() {
		let body = br#"{"predictions":[{"x":100,"y":50,"width":40,"height":20,"label":"dent","confidence":0.91,"class_id":3}]}"#;
		let preds = parse_predictions(body).unwrap();
		assert_eq!(preds.len(), 1);
		assert_eq!(preds[0].label, "dent");
		assert_eq!(preds[0].top_left(), (80.0, 40.0));
	}

	#[test]
	fn empty_list_is_valid() {
		assert!(parse_predictions(br#"{"predictions":[]}"#).unwrap().is_empty());
	}

	#[test]
	fn rejects_missing_field() {
		let body = br#"{"predictions":[{"x":1,"y":2,"width":3,"label":"dent","confidence":0.5}]}"#;
		assert!(parse_predictions(body).unwrap_err().contains("height"));
	}

	#[test]
	fn rejects_non_numeric_field() {
		let body = br#"{"predictions":[{"x":"1","y":2,"width":3,"height":4,"label":"dent","confidence":0.5}]}"#;
		assert!(parse_predictions(body).is_err());
	}

	#[test]
	fn rejects_out_of_range_values() {
		let conf = br#"{"predictions":[{"x":1,"y":2,"width":3,"height":4,"label":"dent","confidence":1.5}]}"#;
		assert!(parse_predictions(conf).unwrap_err().contains("confidence"));

		let size = br#"{"predictions":[{"x":1,"y":2,"width":-3,"height":4,"label":"dent","confidence":0.5}]}"#;
		assert!(parse_predictions(size).unwrap_err().contains("negative"));
	}

	#[test]
	fn rejects_missing_predictions_key() {
		assert!(parse_predictions(br#"{"detections":[]}"#).is_err());
		assert!(parse_predictions(b"<html>502</html>").is_err());
	}
}
