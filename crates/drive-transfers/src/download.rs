//! The download engine
//!
//! Per block: fetch the ciphertext from storage, decrypt and verify against
//! the content session key and the author's keys (the detached signature is
//! itself session-key-encrypted), fold the cleartext through the streaming
//! integrity accumulator, and write to the sink in strict block order.
//! Block fetches are bounded-parallel; a process-wide semaphore caps
//! simultaneous downloads.

use crate::controller::{wait_unpaused, DownloadController, MergedAbort, TransferController};
use crate::integrity::{check_claims, IntegrityAccumulator};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use drive_api::ApiClient;
use drive_core::{
    AbortSignal, DriveError, FetchError, MetricContext, TelemetryEvent, VerificationStatus,
};
use drive_crypto::{DriveCrypto, PublicKey, SessionKey};
use drive_nodes::dto::BlockDto;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::sync::Semaphore;
use tracing::debug;

/// Bounded parallelism of block fetches within one download.
pub const BLOCK_FETCH_CONCURRENCY: usize = 4;

/// Recently decrypted blocks kept by a seekable stream.
pub const SEEKABLE_LRU_BLOCKS: usize = 8;

/// Progress callback, invoked with total cleartext bytes delivered.
pub type ProgressCallback = Arc<dyn Fn(u64) + Send + Sync>;

pub(crate) fn fetch_error(err: FetchError) -> DriveError {
    match err {
        FetchError::Offline => DriveError::offline("stream interrupted"),
        FetchError::Timeout => DriveError::timeout("stream interrupted"),
        FetchError::Aborted => DriveError::Aborted,
        FetchError::Transport(message) => DriveError::network(message),
    }
}

/// Context shared by every block operation of one download.
pub(crate) struct DownloadShared {
    pub api: Arc<ApiClient>,
    pub crypto: DriveCrypto,
    pub content_key: SessionKey,
    pub verification_keys: Vec<PublicKey>,
}

impl DownloadShared {
    /// Fetch, decrypt, and verify one block.
    pub(crate) async fn fetch_block(
        &self,
        block: &BlockDto,
        abort: &AbortSignal,
    ) -> Result<Vec<u8>, DriveError> {
        let response = self
            .api
            .get_blob_stream(&block.bare_url, &block.token, abort)
            .await?;
        let mut body = response.body;
        let mut ciphertext = Vec::with_capacity(block.size as usize);
        while let Some(chunk) = body.next().await {
            ciphertext.extend_from_slice(&chunk.map_err(fetch_error)?);
        }

        let encrypted_signature = block
            .enc_signature
            .as_deref()
            .map(|encoded| BASE64.decode(encoded))
            .transpose()
            .map_err(|err| DriveError::decryption(format!("bad block signature: {err}")))?;

        let decrypted = self
            .crypto
            .decrypt_block(
                &ciphertext,
                encrypted_signature.as_deref(),
                &self.content_key,
                &self.verification_keys,
            )
            .await?;
        if decrypted.verified == VerificationStatus::SignedAndInvalid {
            return Err(DriveError::verification(format!(
                "block {} signature did not verify",
                block.index
            )));
        }
        Ok(decrypted.data)
    }
}

/// Single-shot handle over one file or revision download.
pub struct FileDownloader {
    pub(crate) shared: Arc<DownloadShared>,
    pub(crate) semaphore: Arc<Semaphore>,
    pub(crate) blocks: Vec<BlockDto>,
    pub(crate) claimed_sha1: Option<String>,
    pub(crate) claimed_size: Option<u64>,
    pub(crate) claimed_block_sizes: Option<Vec<u64>>,
    pub(crate) context: MetricContext,
}

impl FileDownloader {
    /// The author's claimed cleartext size. Untrusted until the download
    /// completes its integrity gate.
    pub fn claimed_size_in_bytes(&self) -> Option<u64> {
        self.claimed_size
    }

    /// Stream the file into `sink` with the integrity gate armed.
    pub fn write_to_stream<W>(
        self,
        sink: W,
        on_progress: Option<ProgressCallback>,
        abort: &AbortSignal,
    ) -> DownloadController
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.start(sink, on_progress, abort, true)
    }

    /// Stream without the end-of-file integrity gate. The digest is still
    /// computed; only the comparison is skipped. Debugging aid.
    pub fn unsafe_write_to_stream<W>(
        self,
        sink: W,
        on_progress: Option<ProgressCallback>,
        abort: &AbortSignal,
    ) -> DownloadController
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.start(sink, on_progress, abort, false)
    }

    /// A seekable reader over the same blocks, fetching only what a range
    /// needs, with a small LRU of decrypted blocks.
    pub fn seekable_stream(self, abort: &AbortSignal) -> SeekableFileStream {
        let block_count = self.blocks.len();
        SeekableFileStream {
            shared: self.shared,
            blocks: self.blocks,
            claimed_block_sizes: self.claimed_block_sizes,
            discovered_sizes: vec![None; block_count],
            lru: VecDeque::new(),
            abort: abort.clone(),
        }
    }

    fn start<W>(
        self,
        sink: W,
        on_progress: Option<ProgressCallback>,
        abort: &AbortSignal,
        verify: bool,
    ) -> DownloadController
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        TransferController::spawn(abort, move |paused, merged| {
            let api = self.shared.api.clone();
            let context = self.context;
            let claimed_file_size = self.claimed_size;
            async move {
                let result = run_download(self, sink, on_progress, paused, merged, verify).await;
                match &result {
                    Ok(size) => api.record(TelemetryEvent::Download {
                        context,
                        downloaded_size: *size,
                        claimed_file_size,
                        error: None,
                    }),
                    Err(err) => {
                        // Aborts and validation failures are not transfer
                        // errors.
                        if let Some(kind) = err.telemetry_kind() {
                            api.record(TelemetryEvent::Download {
                                context,
                                downloaded_size: 0,
                                claimed_file_size,
                                error: Some(kind),
                            });
                        }
                    }
                }
                result
            }
        })
    }
}

async fn run_download<W>(
    downloader: FileDownloader,
    mut sink: W,
    on_progress: Option<ProgressCallback>,
    paused: watch::Receiver<bool>,
    merged: MergedAbort,
    verify: bool,
) -> Result<u64, DriveError>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    merged.check()?;
    let _permit = downloader
        .semaphore
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| DriveError::server("download queue closed"))?;

    let shared = Arc::clone(&downloader.shared);
    let abort_signal = merged.signal();
    let block_count = downloader.blocks.len();
    debug!(blocks = block_count, "download starting");

    // Bounded-parallel fetches delivered strictly in block order. The pause
    // gate runs at the head of each block future: pausing stops new fetches
    // while in-flight ones complete.
    let mut ordered = stream::iter(downloader.blocks.into_iter().map(|block| {
        let shared = Arc::clone(&shared);
        let abort_signal = abort_signal.clone();
        let merged = merged.clone();
        let mut paused = paused.clone();
        async move {
            wait_unpaused(&mut paused, &merged).await?;
            shared.fetch_block(&block, &abort_signal).await
        }
    }))
    .buffered(BLOCK_FETCH_CONCURRENCY);

    let mut accumulator = IntegrityAccumulator::new();
    while let Some(cleartext) = ordered.next().await {
        let cleartext = match cleartext {
            Ok(cleartext) => cleartext,
            Err(err) => {
                sink.shutdown().await.ok();
                return Err(err);
            }
        };
        accumulator.update(&cleartext);
        if let Err(err) = sink.write_all(&cleartext).await {
            return Err(DriveError::network(format!("sink write failed: {err}")));
        }
        if let Some(on_progress) = &on_progress {
            on_progress(accumulator.size());
        }
    }
    drop(ordered);

    let (computed_sha1, size) = accumulator.finalize();
    if verify {
        if let Err(err) = check_claims(
            &computed_sha1,
            size,
            downloader.claimed_sha1.as_deref(),
            downloader.claimed_size,
        ) {
            sink.shutdown().await.ok();
            return Err(err);
        }
    }

    sink.flush()
        .await
        .map_err(|err| DriveError::network(format!("sink flush failed: {err}")))?;
    Ok(size)
}

/// Seekable random-access reader over a revision's blocks.
///
/// Fetches only the blocks intersecting the requested range and keeps a
/// small LRU of recently decrypted blocks. Reads are unverified: a full
/// digest check needs the whole file. The LRU size and prefetch policy are
/// tunables with no stability guarantee.
pub struct SeekableFileStream {
    shared: Arc<DownloadShared>,
    blocks: Vec<BlockDto>,
    claimed_block_sizes: Option<Vec<u64>>,
    discovered_sizes: Vec<Option<u64>>,
    lru: VecDeque<(usize, Arc<Vec<u8>>)>,
    abort: AbortSignal,
}

impl SeekableFileStream {
    /// Read up to `len` bytes starting at `offset`. A read past end of file
    /// returns the available prefix.
    pub async fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, DriveError> {
        let mut out = Vec::new();
        if len == 0 {
            return Ok(out);
        }
        let end = offset + len as u64;
        let mut block_start = 0u64;

        for index in 0..self.blocks.len() {
            let size = self.block_size(index).await?;
            let block_end = block_start + size;
            if block_end > offset {
                let data = self.block_data(index).await?;
                let begin = offset.saturating_sub(block_start) as usize;
                let stop = usize::min(size as usize, (end - block_start) as usize);
                out.extend_from_slice(&data[begin..stop]);
            }
            block_start = block_end;
            if block_start >= end {
                break;
            }
        }
        Ok(out)
    }

    async fn block_size(&mut self, index: usize) -> Result<u64, DriveError> {
        if let Some(claimed) = self
            .claimed_block_sizes
            .as_ref()
            .and_then(|sizes| sizes.get(index))
        {
            return Ok(*claimed);
        }
        if let Some(size) = self.discovered_sizes[index] {
            return Ok(size);
        }
        let data = self.block_data(index).await?;
        Ok(data.len() as u64)
    }

    async fn block_data(&mut self, index: usize) -> Result<Arc<Vec<u8>>, DriveError> {
        if let Some(position) = self.lru.iter().position(|(i, _)| *i == index) {
            if let Some(entry) = self.lru.remove(position) {
                let data = entry.1.clone();
                self.lru.push_front(entry);
                return Ok(data);
            }
        }

        let data = Arc::new(
            self.shared
                .fetch_block(&self.blocks[index], &self.abort)
                .await?,
        );
        self.discovered_sizes[index] = Some(data.len() as u64);
        self.lru.push_front((index, data.clone()));
        self.lru.truncate(SEEKABLE_LRU_BLOCKS);
        Ok(data)
    }
}
