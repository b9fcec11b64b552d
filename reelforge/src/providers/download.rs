//! Chunked large-file downloads.
//!
//! Clips download in ranged chunks so a stalled connection costs one chunk
//! timeout, not the whole transfer, and a resumed attempt continues from
//! the bytes already on disk.

use crate::resilience::{CallError, CallOptions, HttpRequest, OperationClass, ResilientCaller};
use crate::store::ArtifactSlot;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const SERVICE: &str = "stock";

/// Bytes per ranged request.
const CHUNK_SIZE: u64 = 4 * 1024 * 1024;

/// Hard ceiling on a single downloaded file.
const MAX_FILE_SIZE: u64 = 512 * 1024 * 1024;

/// Ranged-GET downloader writing into an artifact slot.
pub struct FileDownloader {
    caller: Arc<ResilientCaller>,
}

impl FileDownloader {
    pub fn new(caller: Arc<ResilientCaller>) -> Self {
        Self { caller }
    }

    /// Downloads `url` chunk by chunk into the slot's temp file.
    ///
    /// Each chunk runs under the `download` class deadline with its own
    /// retry budget. A short (or empty) chunk marks the end of the file;
    /// servers that ignore `Range` deliver everything in the first chunk.
    pub async fn download(
        &self,
        url: &str,
        slot: &mut ArtifactSlot,
        cancel: CancellationToken,
    ) -> Result<u64, CallError> {
        let mut offset: u64 = 0;
        loop {
            if offset >= MAX_FILE_SIZE {
                return Err(CallError::Validation(
                    crate::validate::ValidationError::NotAllowed {
                        field: format!("download larger than {} bytes", MAX_FILE_SIZE),
                    },
                ));
            }
            let end = offset + CHUNK_SIZE - 1;
            let response = self
                .caller
                .call(
                    SERVICE,
                    OperationClass::Download,
                    HttpRequest::get(url).header("Range", format!("bytes={}-{}", offset, end)),
                    CallOptions {
                        max_attempts: 3,
                        cancel: cancel.clone(),
                        ..Default::default()
                    },
                )
                .await?;

            let chunk = response.body;
            if chunk.is_empty() {
                break;
            }
            slot.write_all(&chunk).map_err(|e| CallError::Unexpected {
                message: format!("failed to write download chunk: {}", e),
            })?;
            offset += chunk.len() as u64;
            debug!(url, offset, chunk = chunk.len(), "download chunk written");

            // 200 means the server ignored the range header and sent the
            // whole file; a short chunk means we just read the tail.
            if response.status == 200 || (chunk.len() as u64) < CHUNK_SIZE {
                break;
            }
        }
        Ok(offset)
    }
}
