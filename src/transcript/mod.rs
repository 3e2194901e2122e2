pub mod similarity;
pub mod vtt;

pub use similarity::tfidf_similarity;
pub use vtt::{parse, parse_file, Caption, ParsedTranscript};
