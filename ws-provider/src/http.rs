//! Shared plumbing for the JSON control-plane clients.

use crate::error::{ProviderError, Result};
use reqwest::{Response, Url};

/// Append percent-encoded path segments to a base URL.
pub(crate) fn join_url(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| ProviderError::Config(format!("URL cannot be a base: {base}")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Pass successful responses through; turn the rest into [`ProviderError::Api`].
pub(crate) async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().clone();
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::Api(format!("{url} returned {status}: {}", body.trim())))
}
