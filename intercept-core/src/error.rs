//! Error types shared by the core parsing and analytics modules.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Cannot parse JSON '{0}'")]
    ParseJson(String),
    #[error("Invalid capture metadata: {0}")]
    InvalidCapture(String),
    #[error("Selected segment is empty")]
    EmptySegment,
    #[error("start_seconds is beyond end of capture")]
    StartBeyondEnd,
    #[error("duration_seconds must be greater than 0")]
    NonPositiveDuration,
    #[error("No burst markers available. Select a segment manually before trimming.")]
    NoBurstMarkers,
    #[error("Invalid PSK format: {0}")]
    InvalidPsk(String),
    #[error("Message must be 1-237 characters")]
    TextTooLong,
    #[error("Invalid channel index: {0}. Must be 0-7.")]
    InvalidChannel(u32),
    #[error("Invalid destination: {0}")]
    InvalidDestination(String),
    #[error("Frame too short")]
    FrameTooShort,
}
