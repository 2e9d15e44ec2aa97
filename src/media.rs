//! Local media files and the cache of their uploaded URLs.

pub mod cache;
pub mod store;

pub use cache::{CachedAttachment, UploadCache};
pub use store::AttachmentStore;
