//! Adapter trait implemented by every vendor source.
//!
//! An adapter knows one vendor: how to ask it for a [`FetchRequest`] and how to
//! turn its raw answer into the canonical type. It knows nothing about the
//! cache, the breaker, or other vendors; the pipeline sits above it. Tests
//! implement this trait with scripted in-process adapters.

use crate::error::FetchError;
use crate::model::FetchRequest;
use crate::retry::RetryPolicy;
use tracing::debug;

pub trait Adapter<T>: Send + Sync {
    /// Registry name, e.g. `eastmoney_fundgz`.
    fn name(&self) -> &str;

    fn retry_policy(&self) -> &RetryPolicy;

    /// One vendor round-trip returning the raw body.
    fn request(&self, req: &FetchRequest) -> Result<String, FetchError>;

    /// Parse and normalize a raw body. Never retried.
    fn normalize(&self, raw: &str, req: &FetchRequest) -> Result<T, FetchError>;

    /// Post-normalization adjustment that may need further vendor calls.
    fn refine(&self, value: T, _req: &FetchRequest) -> Result<T, FetchError> {
        Ok(value)
    }

    /// Retried request, then normalize and refine.
    fn fetch(&self, req: &FetchRequest) -> Result<T, FetchError> {
        let raw = self.retry_policy().run(|attempt| {
            debug!(source = self.name(), attempt = attempt + 1, key = %req.cache_key(), "vendor request");
            self.request(req)
        })?;
        let value = self.normalize(&raw, req)?;
        self.refine(value, req)
    }
}
