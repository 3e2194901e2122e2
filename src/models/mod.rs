pub mod paths;
pub mod segment;
pub mod video;
pub mod word;

pub use paths::{HasMediaPaths, SegmentPaths, VideoPaths, WordPaths};
pub use segment::{
    AlignedWord, HeadPose, HeadPoseDirection, LocalIdentity, Segment, SegmentState, SpeakerSync,
};
pub use video::{TranscriptType, Video, VideoInfo, VideoStatus};
pub use word::Word;
