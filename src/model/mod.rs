pub mod comment;
pub mod normalize;
pub mod sentiment;

pub use comment::{CanonicalComment, ClassifiedComment, MediaType, Source};
pub use normalize::{normalize, RawComment, ValidationError};
pub use sentiment::{Classification, Sentiment};
