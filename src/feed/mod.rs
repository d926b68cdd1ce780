//! Upstream feed access
//!
//! - `raw`: typed, tolerant decoder for raw feed payloads
//! - `fetcher`: cursor-based pagination loop with termination policy

mod fetcher;
mod raw;

pub use fetcher::{FetchOptions, RetryPolicy, TimelineCursor, TimelineSource};
pub use raw::{RawItem, RawMedia, TimelinePage, decode_timeline_page};
