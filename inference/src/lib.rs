//! Client for the vehicle-damage detection service.
//!
//! One multipart `POST` per image, no retries. Callers that need to abandon a
//! request run `classify` on a worker thread and drop the result.

use std::time::Duration;

use anyhow::Context;
use reqwest::blocking::multipart::{Form, Part};

pub mod schema;

pub const DEFAULT_ENDPOINT: &str = "http://localhost:8000/predict/";

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
	/// No response: connect failure, timeout, broken transfer.
	#[error("no response from detection service: {0}")]
	Network(String),
	/// A response that was not a usable prediction list.
	#[error("detection service error (status {status}): {detail}")]
	Service { status: u16, detail: String },
}

pub trait Classifier: Send + Sync {
	fn classify(&self, file: &ie::ImageFile) -> Result<Vec<ie::Prediction>, InferenceError>;
}

pub struct InferenceClient {
	endpoint: String,
	http: reqwest::blocking::Client,
}

impl InferenceClient {
	pub fn new(endpoint: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
		let http = reqwest::blocking::Client::builder()
			.timeout(timeout)
			.build()
			.context("build HTTP client")?;
		Ok(Self {
			endpoint: endpoint.into(),
			http,
		})
	}

	pub fn endpoint(&self) -> &str {
		&self.endpoint
	}
}

const OCTET_STREAM: &str = "application/octet-stream";

/// The multipart file part. An unparseable MIME type is sent as octet-stream.
fn upload_part(file: &ie::ImageFile) -> Part {
	let part = || Part::bytes(file.bytes.clone()).file_name(file.name.clone());
	part().mime_str(&file.mime).unwrap_or_else(|err| {
		tracing::warn!(mime = %file.mime, error = %err, "invalid MIME type; sending as application/octet-stream");
		part().mime_str(OCTET_STREAM).unwrap_or_else(|_| part())
	})
}

impl Classifier for InferenceClient {
	fn classify(&self, file: &ie::ImageFile) -> Result<Vec<ie::Prediction>, InferenceError> {
		let form = Form::new().part("file", upload_part(file));

		tracing::info!(endpoint = %self.endpoint, file = %file.name, bytes = file.bytes.len(), "classifying image");
		let response = self
			.http
			.post(&self.endpoint)
			.multipart(form)
			.send()
			.map_err(|err| InferenceError::Network(err.to_string()))?;

		let status = response.status();
		if !status.is_success() {
			let detail = response.text().unwrap_or_default();
			return Err(InferenceError::Service {
				status: status.as_u16(),
				detail: if detail.is_empty() {
					status.canonical_reason().unwrap_or("unsuccessful response").to_string()
				} else {
					detail
				},
			});
		}

		let body = response
			.bytes()
			.map_err(|err| InferenceError::Network(err.to_string()))?;
		let predictions = schema::parse_predictions(&body).map_err(|detail| InferenceError::Service {
			status: status.as_u16(),
			detail: format!("malformed response: {detail}"),
		})?;

		tracing::debug!(count = predictions.len(), "received predictions");
		Ok(predictions)
	}
}
