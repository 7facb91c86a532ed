//! Block-level transfer engines
//!
//! Download: streamed, verifying block download with a pause/resume/abort
//! controller, an end-of-stream integrity gate, and a seekable variant.
//! Upload: chunked encrypt-sign-commit pipeline with name-collision
//! handling, draft reclaim, per-block verifier tokens, and a signed
//! manifest at commit.

pub mod controller;
pub mod download;
pub mod integrity;
pub mod service;
pub mod upload;

pub use controller::{DownloadController, TransferController, UploadController};
pub use download::{
    FileDownloader, ProgressCallback, SeekableFileStream, BLOCK_FETCH_CONCURRENCY,
    SEEKABLE_LRU_BLOCKS,
};
pub use integrity::{check_claims, is_well_formed_sha1, IntegrityAccumulator};
pub use service::Transfers;
pub use upload::{
    FileUploader, Thumbnail, UploadMetadata, UPLOAD_BLOCK_CONCURRENCY, UPLOAD_BLOCK_SIZE,
};
