pub mod backfill;
pub mod client;
pub mod config;
pub mod eligibility;
pub mod error;
pub mod forum;
pub mod jobs;
pub mod pipeline;
pub mod policy;
pub mod rate_limit;
pub mod request;
pub mod response;
pub mod scheduler;
pub mod server;
pub mod store;

#[cfg(test)]
mod test_support;

pub use backfill::{InspectToxicPosts, ScanOutcome, ScanReport};
pub use client::ScoreClient;
pub use config::{AttributeModel, Config};
pub use forum::{MemoryForum, Post, PostRepository};
pub use pipeline::Moderator;
pub use response::ScoreResult;
pub use store::PluginStore;
