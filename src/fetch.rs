//! HTTP object fetching.
//!
//! The wire protocol is plain GET against a flat namespace: the two
//! manifest sidecars and raw file bytes, all under
//! `<DeployUrl>/<RemotePath>/`.

use crate::error::{UpdateError, UpdateResult};
use reqwest::{Client, StatusCode};
use std::path::Path;

pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    /// Build a fetcher, routing through `proxy` when one is configured.
    pub fn new(proxy: Option<&str>) -> UpdateResult<Self> {
        let mut builder = Client::builder();
        if let Some(url) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(url)?);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }

    /// GET one object into one file.
    ///
    /// Exactly HTTP 200 counts as success; the destination is written only
    /// after the full body has arrived, so an existing file is never
    /// clobbered by a failed fetch.
    pub async fn fetch_to_file(&self, url: &str, dest: &Path) -> UpdateResult<()> {
        let resp = self.client.get(url).send().await?;
        if resp.status() != StatusCode::OK {
            return Err(UpdateError::HttpStatus {
                url: url.to_string(),
                status: resp.status(),
            });
        }
        let body = resp.bytes().await?;
        tokio::fs::write(dest, &body).await?;
        Ok(())
    }
}
