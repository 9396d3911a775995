//! Release publishers.

mod fs;
mod github;

pub use fs::FsReleasePublisher;
pub use github::{GitHubConfig, GitHubReleasePublisher};
