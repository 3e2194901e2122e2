//! Error types for service calls and pipeline gates.

use thiserror::Error;

/// Errors raised while talking to an analysis service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{service} unreachable: {message}")]
    Transport { service: &'static str, message: String },

    #[error("{service} returned status {status}: {body}")]
    Rejected {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("{service} response could not be decoded: {message}")]
    Decode { service: &'static str, message: String },

    #[error("{service} returned no result: {message}")]
    Empty { service: &'static str, message: String },

    #[error("{service} failed: {message}")]
    Local { service: &'static str, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    /// Whether repeating the same request could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ServiceError::Transport { .. } => true,
            ServiceError::Rejected { status, .. } => matches!(status, 502..=504),
            _ => false,
        }
    }

    pub fn from_ureq(service: &'static str, err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(status, response) => {
                let body = response.into_string().unwrap_or_default();
                ServiceError::Rejected {
                    service,
                    status,
                    body,
                }
            }
            ureq::Error::Transport(t) => ServiceError::Transport {
                service,
                message: t.to_string(),
            },
        }
    }

    pub fn decode(service: &'static str, err: impl std::fmt::Display) -> Self {
        ServiceError::Decode {
            service,
            message: err.to_string(),
        }
    }

    pub fn empty(service: &'static str, message: impl Into<String>) -> Self {
        ServiceError::Empty {
            service,
            message: message.into(),
        }
    }
}

/// Why a segment was removed at a gate.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RejectReason {
    #[error("media slicing failed: {0}")]
    SliceFailed(String),

    #[error("speech recognition unavailable: {0}")]
    TranscriptionUnavailable(String),

    #[error("speech recognition returned no text")]
    EmptyTranscription,

    #[error("ASR confidence {confidence:.2} below floor {floor:.2}")]
    LowAsrConfidence { confidence: f64, floor: f64 },

    #[error("transcript similarity {similarity:.3} below threshold {threshold:.3}")]
    TranscriptMismatch { similarity: f64, threshold: f64 },

    #[error("face detection unavailable: {0}")]
    DetectionUnavailable(String),

    #[error("no faces detected")]
    NoFacesDetected,

    #[error("clip has {media} frames but detection covered {detected}")]
    FrameCountMismatch { media: usize, detected: usize },

    #[error("no sync results for any full-coverage track")]
    NoSyncResults,

    #[error("no speaker found: confidence {confidence:.2} below floor {floor:.2}")]
    LowSyncConfidence { confidence: f64, floor: f64 },

    #[error("speaker media could not be produced: {0}")]
    SpeakerMediaFailed(String),

    #[error("forced alignment failed: {0}")]
    AlignmentFailed(String),
}

/// Why a whole video was discarded.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VideoRejection {
    #[error("not enough views: {views} < {min}")]
    TooFewViews { views: u64, min: u64 },

    #[error("video too long: {duration_secs:.0}s > {max_secs}s")]
    TooLong { duration_secs: f64, max_secs: u64 },

    #[error("video has no transcript")]
    NoTranscript,

    #[error("transcript is auto-generated and only manual transcripts are accepted")]
    AutoTranscript,

    #[error("transcript yielded no usable segments")]
    NoSegments,

    #[error("no segments survived {stage}")]
    Exhausted { stage: &'static str },
}

/// Errors that abort a whole harvest of one video.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("acquisition failed for {url}: {source}")]
    Acquisition {
        url: String,
        #[source]
        source: ServiceError,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for HarvestError {
    fn from(err: rusqlite::Error) -> Self {
        HarvestError::Other(err.into())
    }
}

impl From<std::io::Error> for HarvestError {
    fn from(err: std::io::Error) -> Self {
        HarvestError::Other(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let transport = ServiceError::Transport {
            service: "asr",
            message: "connection refused".into(),
        };
        assert!(transport.is_transient());

        let gateway = ServiceError::Rejected {
            service: "asr",
            status: 503,
            body: String::new(),
        };
        assert!(gateway.is_transient());

        let bad_request = ServiceError::Rejected {
            service: "asr",
            status: 400,
            body: String::new(),
        };
        assert!(!bad_request.is_transient());
        assert!(!ServiceError::empty("face-net", "no face").is_transient());
    }

    #[test]
    fn test_reason_messages_name_threshold() {
        let reason = RejectReason::LowSyncConfidence {
            confidence: 3.0,
            floor: 5.0,
        };
        assert_eq!(
            reason.to_string(),
            "no speaker found: confidence 3.00 below floor 5.00"
        );
    }
}
