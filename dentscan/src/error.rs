use inference::InferenceError;

use crate::camera::CameraError;

/// Every way a cycle can fail. `Display` is the message shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
	#[error("Unsupported image: {0}")]
	UnsupportedFormat(String),
	#[error("Error uploading file: {0}")]
	Network(String),
	#[error("Detection service error ({status}): {detail}")]
	Service { status: u16, detail: String },
	#[error("Camera error: {0}")]
	Device(String),
	#[error("Could not read file: {0}")]
	Read(String),
}

impl From<ie::NormalizeError> for PipelineError {
	fn from(err: ie::NormalizeError) -> Self {
		match err {
			ie::NormalizeError::UnsupportedFormat(msg) => Self::UnsupportedFormat(msg),
		}
	}
}

impl From<InferenceError> for PipelineError {
	fn from(err: InferenceError) -> Self {
		match err {
			InferenceError::Network(msg) => Self::Network(msg),
			InferenceError::Service { status, detail } => Self::Service { status, detail },
		}
	}
}

impl From<CameraError> for PipelineError {
	fn from(err: CameraError) -> Self {
		Self::Device(err.to_string())
	}
}
