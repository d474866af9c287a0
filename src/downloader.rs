//! Bundle downloader contract.
//!
//! Fetching is a collaborator concern: the manager hands implementations a
//! destination under its staging directory and never inspects the transport.

use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;

/// What kind of content a download carries.
///
/// Lets implementations pick transport parameters (retry budget, integrity
/// checks) per content class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadContent {
    /// A service bundle archive.
    Service,
    /// An image layer blob.
    Layer,
}

impl std::fmt::Display for DownloadContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Service => write!(f, "service"),
            Self::Layer => write!(f, "layer"),
        }
    }
}

/// Fetches a remote bundle to a local staging path.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Downloads `url` to `dest`.
    ///
    /// `dest` is inside the manager's staging directory and owned by the
    /// calling install task; implementations may create or overwrite it.
    async fn download(&self, url: &str, dest: &Path, content: DownloadContent) -> Result<()>;
}
