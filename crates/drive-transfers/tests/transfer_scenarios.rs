//! End-to-end transfer scenarios against the scripted world.

use assert_matches::assert_matches;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use drive_core::{
    AbortController, AbortSignal, DriveError, TelemetryErrorKind, TelemetryEvent,
    VerificationStatus,
};
use drive_testkit::{json_ok, DriveWorld};
use drive_transfers::{IntegrityAccumulator, Thumbnail, Transfers, UploadMetadata};
use futures::stream;
use parking_lot::Mutex;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;

/// Byte sink whose contents stay reachable after the task takes it.
#[derive(Clone, Default)]
struct SharedSink {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl SharedSink {
    fn new() -> Self {
        Self::default()
    }

    fn contents(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }
}

impl AsyncWrite for SharedSink {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, std::io::Error>> {
        self.bytes.lock().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), std::io::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        Poll::Ready(Ok(()))
    }
}

fn sha1_hex(data: &[u8]) -> String {
    let mut accumulator = IntegrityAccumulator::new();
    accumulator.update(data);
    accumulator.finalize().0
}

fn transfers(world: &DriveWorld) -> Transfers {
    Transfers::new(world.access(), world.account.clone(), "test-client".to_string())
}

#[tokio::test]
async fn download_happy_path_delivers_and_reports() {
    let world = DriveWorld::new().await;
    let content = b"twelve bytes";
    let (node_uid, _) = world
        .add_file(
            "root",
            "data.bin",
            content,
            content.len(),
            Some(sha1_hex(content)),
            Some(content.len() as u64),
        )
        .await;

    let engine = transfers(&world);
    let downloader = engine
        .get_file_downloader(&node_uid, &AbortSignal::none())
        .await
        .unwrap();
    assert_eq!(downloader.claimed_size_in_bytes(), Some(12));

    let sink = SharedSink::new();
    let controller = downloader.write_to_stream(sink.clone(), None, &AbortSignal::none());
    let delivered = controller.completion().await.unwrap();

    assert_eq!(delivered, 12);
    assert_eq!(sink.contents(), content);
    assert!(world.telemetry.events().iter().any(|event| matches!(
        event,
        TelemetryEvent::Download {
            downloaded_size: 12,
            claimed_file_size: Some(12),
            error: None,
            ..
        }
    )));
}

#[tokio::test]
async fn download_integrity_fault_rejects_and_reports() {
    let world = DriveWorld::new().await;
    let content = b"twelve bytes";
    let (node_uid, _) = world
        .add_file(
            "root",
            "data.bin",
            content,
            content.len(),
            Some(sha1_hex(b"other content")),
            Some(content.len() as u64),
        )
        .await;

    let engine = transfers(&world);
    let downloader = engine
        .get_file_downloader(&node_uid, &AbortSignal::none())
        .await
        .unwrap();
    let controller = downloader.write_to_stream(SharedSink::new(), None, &AbortSignal::none());
    let result = controller.completion().await;

    assert_matches!(result, Err(DriveError::Integrity { .. }));
    assert!(world.telemetry.events().iter().any(|event| matches!(
        event,
        TelemetryEvent::Download {
            error: Some(TelemetryErrorKind::IntegrityError),
            ..
        }
    )));
}

#[tokio::test]
async fn unsafe_download_skips_the_gate_but_still_computes() {
    let world = DriveWorld::new().await;
    let content = b"twelve bytes";
    let (node_uid, _) = world
        .add_file(
            "root",
            "data.bin",
            content,
            content.len(),
            Some(sha1_hex(b"other content")),
            Some(content.len() as u64),
        )
        .await;

    let engine = transfers(&world);
    let downloader = engine
        .get_file_downloader(&node_uid, &AbortSignal::none())
        .await
        .unwrap();
    let sink = SharedSink::new();
    let controller = downloader.unsafe_write_to_stream(sink.clone(), None, &AbortSignal::none());
    let delivered = controller.completion().await.unwrap();
    assert_eq!(delivered, 12);
    assert_eq!(sink.contents(), content);
}

#[tokio::test]
async fn aborted_download_is_not_reported_to_telemetry() {
    let world = DriveWorld::new().await;
    let content = b"twelve bytes";
    let (node_uid, _) = world
        .add_file("root", "data.bin", content, content.len(), None, None)
        .await;

    let engine = transfers(&world);
    let downloader = engine
        .get_file_downloader(&node_uid, &AbortSignal::none())
        .await
        .unwrap();

    let controller = AbortController::new();
    controller.abort();
    let download = downloader.write_to_stream(SharedSink::new(), None, &controller.signal());
    let result = download.completion().await;

    assert_matches!(result, Err(DriveError::Aborted));
    assert!(!world
        .telemetry
        .events()
        .iter()
        .any(|event| matches!(event, TelemetryEvent::Download { .. })));
}

#[tokio::test]
async fn seekable_stream_reads_ranges_across_blocks() {
    let world = DriveWorld::new().await;
    let content = b"abcdefghijkl";
    let (node_uid, _) = world
        .add_file("root", "data.bin", content, 4, None, Some(12))
        .await;

    let engine = transfers(&world);
    let downloader = engine
        .get_file_downloader(&node_uid, &AbortSignal::none())
        .await
        .unwrap();
    let mut seekable = downloader.seekable_stream(&AbortSignal::none());

    assert_eq!(seekable.read_at(5, 4).await.unwrap(), b"fghi");
    assert_eq!(seekable.read_at(0, 3).await.unwrap(), b"abc");
    assert_eq!(seekable.read_at(10, 10).await.unwrap(), b"kl");
}

fn register_upload_routes(world: &DriveWorld) {
    world.fetcher.on_json(
        "POST",
        "drive/v2/volumes/vol-1/files",
        serde_json::json!({
            "Code": 1000,
            "File": {"ID": "file-new", "RevisionID": "rev-new"},
        })
        .to_string(),
    );
    world.fetcher.on_json(
        "GET",
        "/revisions/rev-new/verification",
        serde_json::json!({
            "Code": 1000,
            "VerificationCode": BASE64.encode(b"verification-code"),
        })
        .to_string(),
    );
    world.fetcher.on("POST", "drive/blocks", |request| {
        let body: serde_json::Value =
            serde_json::from_slice(request.body.as_deref().unwrap_or_default()).unwrap();
        let blocks = body["Blocks"].as_array().cloned().unwrap_or_default();
        let upload_links: Vec<serde_json::Value> = blocks
            .iter()
            .map(|block| {
                serde_json::json!({
                    "Index": block["Index"],
                    "BareURL": format!("https://storage.test/upload/{}", block["Index"]),
                    "Token": "upload-token",
                })
            })
            .collect();
        let thumbnails = body["Thumbnails"].as_array().cloned().unwrap_or_default();
        let thumbnail_links: Vec<serde_json::Value> = thumbnails
            .iter()
            .enumerate()
            .map(|(position, _)| {
                serde_json::json!({
                    "Index": 0,
                    "BareURL": format!("https://storage.test/thumb/{position}"),
                    "Token": "thumb-token",
                })
            })
            .collect();
        Ok(json_ok(
            &serde_json::json!({
                "Code": 1000,
                "UploadLinks": upload_links,
                "ThumbnailLinks": thumbnail_links,
            })
            .to_string(),
        ))
    });
    world.fetcher.on("POST", "storage.test/upload/", |_| {
        Ok(json_ok(&serde_json::json!({"Code": 1000}).to_string()))
    });
    world.fetcher.on("POST", "storage.test/thumb/", |_| {
        Ok(json_ok(&serde_json::json!({"Code": 1000}).to_string()))
    });
    world.fetcher.on_json(
        "PUT",
        "/revisions/rev-new",
        serde_json::json!({"Code": 1000}).to_string(),
    );
}

#[tokio::test]
async fn upload_commits_a_verifiable_manifest() {
    let world = DriveWorld::new().await;
    register_upload_routes(&world);

    let engine = transfers(&world);
    let uploader = engine
        .get_file_uploader(
            &world.root_uid,
            "report.pdf",
            UploadMetadata {
                media_type: Some("application/pdf".to_string()),
                expected_size: Some(11),
                modification_time: Some(1_700_000_500),
            },
            &AbortSignal::none(),
        )
        .await
        .unwrap();

    let source = stream::iter(vec![Ok(b"hello world".to_vec())]);
    let controller = uploader.write_stream(source, Vec::new(), None, &AbortSignal::none());
    let node_uid = controller.completion().await.unwrap();
    assert_eq!(node_uid.node_id.as_str(), "file-new");

    // Rebuild the manifest from the token request and check the commit's
    // detached signature against the signing address.
    let requests = world.fetcher.requests();
    let token_request = requests
        .iter()
        .find(|request| request.url.contains("drive/blocks"))
        .expect("token request");
    let token_body: serde_json::Value =
        serde_json::from_slice(token_request.body.as_deref().unwrap()).unwrap();
    let mut manifest: Vec<u8> = Vec::new();
    for block in token_body["Blocks"].as_array().unwrap() {
        manifest.extend_from_slice(&BASE64.decode(block["Hash"].as_str().unwrap()).unwrap());
    }

    let commit_request = requests
        .iter()
        .find(|request| request.url.contains("/revisions/rev-new") && request.method.as_str() == "PUT")
        .expect("commit request");
    let commit_body: serde_json::Value =
        serde_json::from_slice(commit_request.body.as_deref().unwrap()).unwrap();
    let signature = drive_crypto::ArmoredSignature(
        commit_body["ManifestSignature"].as_str().unwrap().to_string(),
    );
    let verified = world
        .crypto
        .verify_manifest(&manifest, &signature, &[world.address_public.clone()])
        .await
        .unwrap();
    assert_eq!(verified, VerificationStatus::SignedAndValid);

    assert!(world.telemetry.events().iter().any(|event| matches!(
        event,
        TelemetryEvent::Upload { error: None, .. }
    )));
}

#[tokio::test]
async fn upload_name_collision_falls_back_to_the_numbered_variant() {
    let world = DriveWorld::new().await;
    register_upload_routes(&world);

    let parent_hash_key = world.fixture_keys("root").hash_key.unwrap();
    let taken_hash = drive_crypto::generate_lookup_hash("a.txt", &parent_hash_key).unwrap();
    let variant_hash =
        drive_crypto::generate_lookup_hash("a (1).txt", &parent_hash_key).unwrap();

    // The desired name is pending under another client; the first variant
    // is free.
    let taken = taken_hash.clone();
    world.fetcher.on("POST", "checkAvailableHashes", move |request| {
        let body: serde_json::Value =
            serde_json::from_slice(request.body.as_deref().unwrap_or_default()).unwrap();
        let probed: Vec<String> = body["Hashes"]
            .as_array()
            .unwrap()
            .iter()
            .map(|hash| hash.as_str().unwrap().to_string())
            .collect();
        let available: Vec<String> = probed
            .iter()
            .filter(|hash| **hash != taken)
            .cloned()
            .collect();
        Ok(json_ok(
            &serde_json::json!({
                "Code": 1000,
                "AvailableHashes": available,
                "PendingHashes": [{"Hash": taken, "ClientUID": "other"}],
            })
            .to_string(),
        ))
    });

    let engine = transfers(&world);
    let uploader = engine
        .get_file_uploader(
            &world.root_uid,
            "a.txt",
            UploadMetadata::default(),
            &AbortSignal::none(),
        )
        .await
        .unwrap();
    let source = stream::iter(vec![Ok(b"content".to_vec())]);
    let controller = uploader.write_stream(source, Vec::new(), None, &AbortSignal::none());
    controller.completion().await.unwrap();

    // The draft was created under the variant's hash.
    let create_request = world
        .fetcher
        .requests()
        .into_iter()
        .find(|request| {
            request.url.ends_with("volumes/vol-1/files") && request.method.as_str() == "POST"
        })
        .expect("draft creation");
    let create_body: serde_json::Value =
        serde_json::from_slice(create_request.body.as_deref().unwrap()).unwrap();
    assert_eq!(create_body["Hash"].as_str().unwrap(), variant_hash);
}

#[tokio::test]
async fn failed_upload_cleans_up_its_draft() {
    let world = DriveWorld::new().await;
    register_upload_routes(&world);
    // Storage rejects every block POST.
    world.fetcher.on("POST", "storage.test/upload/", |_| {
        Err(drive_core::FetchError::Transport("storage down".to_string()))
    });
    let deleted = Arc::new(Mutex::new(false));
    let deleted_inner = Arc::clone(&deleted);
    world.fetcher.on("POST", "delete_multiple", move |_| {
        *deleted_inner.lock() = true;
        Ok(json_ok(
            &serde_json::json!({"Code": 1000, "Responses": []}).to_string(),
        ))
    });

    let engine = transfers(&world);
    let uploader = engine
        .get_file_uploader(
            &world.root_uid,
            "doomed.bin",
            UploadMetadata::default(),
            &AbortSignal::none(),
        )
        .await
        .unwrap();
    let source = stream::iter(vec![Ok(b"payload".to_vec())]);
    let controller = uploader.write_stream(source, Vec::new(), None, &AbortSignal::none());
    let result = controller.completion().await;

    assert_matches!(result, Err(DriveError::Network { .. }));
    assert!(*deleted.lock());
    assert!(world.telemetry.events().iter().any(|event| matches!(
        event,
        TelemetryEvent::Upload {
            error: Some(TelemetryErrorKind::NetworkError),
            ..
        }
    )));
}

#[tokio::test]
async fn upload_carries_thumbnails() {
    let world = DriveWorld::new().await;
    register_upload_routes(&world);

    let engine = transfers(&world);
    let uploader = engine
        .get_file_uploader(
            &world.root_uid,
            "photo.jpg",
            UploadMetadata::default(),
            &AbortSignal::none(),
        )
        .await
        .unwrap();
    let source = stream::iter(vec![Ok(b"image data".to_vec())]);
    let thumbnails = vec![Thumbnail {
        thumbnail_type: 1,
        data: b"tiny preview".to_vec(),
    }];
    let controller = uploader.write_stream(source, thumbnails, None, &AbortSignal::none());
    controller.completion().await.unwrap();

    assert_eq!(world.fetcher.request_count("storage.test/thumb/"), 1);
}
