//! Error types for spectrovis
//!
//! Every failure of a decode or an analysis run ends up as one of these,
//! and is surfaced to observers through `VisualizationState::Errored`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisualizerError {
    /// The raw bytes of the input could not be obtained.
    #[error("Failed to read audio data: {0}")]
    Read(#[from] std::io::Error),

    /// The bytes are not audio we can decode.
    #[error("Failed to decode audio: {0}")]
    Decode(String),

    /// The transform pipeline gave up mid-run or refused the configuration.
    #[error("Analysis failed: {0}")]
    Analysis(String),

    /// The operation was superseded. Never shown to observers.
    #[error("Operation cancelled")]
    Cancelled,
}

impl From<symphonia::core::errors::Error> for VisualizerError {
    fn from(e: symphonia::core::errors::Error) -> Self {
        VisualizerError::Decode(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, VisualizerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symphonia_io_errors_are_decode_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "end of stream");
        let err: VisualizerError = symphonia::core::errors::Error::IoError(io).into();
        assert!(matches!(err, VisualizerError::Decode(_)));
    }

    #[test]
    fn messages_name_the_failure_class() {
        let err = VisualizerError::Analysis("transform size 1000 is not a power of two".into());
        assert_eq!(
            err.to_string(),
            "Analysis failed: transform size 1000 is not a power of two"
        );
    }
}
