use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

/// One page of a prefix listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub keys: Vec<String>,
    pub is_truncated: bool,
    /// Token to pass back to fetch the next page.
    pub next_token: Option<String>,
}

/// Object storage the reconciler drains into. Implementations are bound to a single bucket.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Stream the current contents of `local` to `key`.
    async fn put(&self, key: &str, local: &Path) -> Result<()>;
    async fn list_by_prefix(&self, prefix: &str, continuation: Option<String>) -> Result<ListPage>;
    async fn delete(&self, key: &str) -> Result<()>;
}
