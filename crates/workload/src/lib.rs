pub mod burn;
pub mod error;
pub mod source;
pub mod thumbnail;

pub use error::WorkloadError;
pub use source::{collect_jobs, SourceOptions};
pub use thumbnail::{Thumbnail, ThumbnailProcessor};
