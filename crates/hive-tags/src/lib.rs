//! The tag service.
//!
//! Tags live as one JSON blob per resource at `tags/<resourceID>.json` in
//! the object store. Create/Describe/DeleteTags arrive over the broker's
//! queue subjects; a single read/write lock makes each read-modify-write
//! cycle atomic.

mod serve;
mod service;

pub use serve::serve;
pub use service::TagsService;
