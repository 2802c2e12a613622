//! Digest and size of remote content, computed without buffering it.

use super::{Requests, TransportError};
use crate::integrity::{Integrity, IntegrityBuilder};
use futures::StreamExt;

/// Chunk size used while hashing remote content.
const PART_SIZE: usize = 64 * 1024;

/// What an offline build needs to know about a remote file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteUrlMetadata {
    /// sha256 of the body.
    pub integrity: Integrity,
    /// Body length in bytes.
    pub size: u64,
}

impl RemoteUrlMetadata {
    /// Stream `url` once, hashing and measuring it.
    ///
    /// # Errors
    /// Returns the transport error that aborted the stream.
    pub async fn get(requests: &Requests, url: &str, cachable: bool) -> Result<Self, TransportError> {
        let mut builder = IntegrityBuilder::new();
        let mut size = 0u64;

        let mut parts = requests.read_parts(url, PART_SIZE, cachable);
        while let Some(part) = parts.next().await {
            let part = part?;
            size += part.len() as u64;
            builder.update(&part);
        }

        Ok(Self {
            integrity: builder.build(),
            size,
        })
    }
}
