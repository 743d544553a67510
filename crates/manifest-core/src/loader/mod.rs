//! Source loaders: the "fetch raw content for a URI" contract
//!
//! Loaders are plain transports. Timeouts, authentication and caching
//! policy belong to them; single-flight per URI and error attribution
//! belong to the engine.

mod fs;

pub use fs::FsSourceLoader;

use async_trait::async_trait;

use crate::Result;
use crate::content::SourceData;

/// Fetches raw manifest content
#[async_trait]
pub trait SourceLoader: Send + Sync {
    /// Fetch the resource at `uri`.
    ///
    /// `base` is the URI of the importing manifest, `None` for roots. The
    /// engine has already resolved `uri` against it.
    async fn request(&self, uri: &str, base: Option<&str>) -> Result<SourceData>;
}
