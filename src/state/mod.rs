//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `FrontierStatus`: lifecycle state of a URL (pending, in flight, succeeded, failed)
//! - `FrontierItem`: a URL in the frontier with its depth, attempts and backoff

mod frontier_item;
mod frontier_status;

pub use frontier_item::FrontierItem;
pub use frontier_status::FrontierStatus;
