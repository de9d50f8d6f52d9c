pub mod error;
pub mod retry;
pub mod schema;
pub mod store;

pub use error::StoreError;
pub use retry::RetryPolicy;
pub use store::{CommentStore, SentimentBreakdown, Statistics, UndefinedFilter};
