//! Integration tests for the upload coordinator: chunk intake, finalize,
//! simple uploads, progress and the sweep.

mod common;

use bytes::Bytes;
use common::{FaultyStore, ScriptedIds, TestServer, seeded_bytes, split_into_chunks, submission};
use parcel_core::config::AppConfig;
use parcel_core::{
    ChunkReceipt, FileId, FinalizeRequest, ProgressEvent, SessionState, UploadPhase,
};
use parcel_server::UploadError;
use parcel_server::coordinator::SimpleUpload;
use parcel_storage::ObjectStore;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

fn file_id(id: &str) -> FileId {
    FileId::parse(id).unwrap()
}

/// Small thresholds so multipart commits happen with tiny payloads.
fn small_parts(config: &mut AppConfig) {
    config.upload.multipart_threshold = 1000;
    config.upload.part_size = 400;
}

fn simple(file_name: &str, session_id: Option<&str>) -> SimpleUpload {
    SimpleUpload {
        session_id: session_id.map(file_id),
        file_name: file_name.to_string(),
        file_type: None,
        expires: None,
        domain: None,
    }
}

/// Submit `chunks` in the given index order.
async fn submit_in_order(
    server: &TestServer,
    id: &FileId,
    name: &str,
    file_size: u64,
    chunks: &[Bytes],
    order: &[u32],
) -> Vec<ChunkReceipt> {
    let sub = submission(name, file_size, chunks.len() as u32);
    let mut receipts = Vec::new();
    for &index in order {
        let receipt = server
            .coordinator()
            .submit_chunk(id, index, &sub, chunks[index as usize].clone())
            .await
            .unwrap();
        receipts.push(receipt);
    }
    receipts
}

// =============================================================================
// Chunk intake
// =============================================================================

#[tokio::test]
async fn test_duplicate_chunk_is_recorded_once() {
    let store = Arc::new(FaultyStore::new());
    let server = TestServer::with_storage(store.clone(), |_| {}).await;
    let id = file_id("dup-seq");
    let sub = submission("notes.txt", 20, 2);
    let chunk = Bytes::from_static(b"0123456789");

    let first = server
        .coordinator()
        .submit_chunk(&id, 0, &sub, chunk.clone())
        .await
        .unwrap();
    let second = server
        .coordinator()
        .submit_chunk(&id, 0, &sub, chunk)
        .await
        .unwrap();

    assert_eq!(first.received_chunks, 1);
    assert!(!first.duplicate);
    assert_eq!(second.received_chunks, 1);
    assert!(second.duplicate);
    assert_eq!(store.chunk_puts(), 1);
    assert_eq!(server.metadata().count_chunks("dup-seq").await.unwrap(), 1);
}

#[tokio::test]
async fn test_concurrent_duplicate_chunk_is_recorded_once() {
    let server = TestServer::new().await;
    let id = file_id("dup-conc");
    let sub = submission("notes.txt", 20, 2);
    let chunk = Bytes::from_static(b"0123456789");

    let (a, b) = tokio::join!(
        server.coordinator().submit_chunk(&id, 1, &sub, chunk.clone()),
        server.coordinator().submit_chunk(&id, 1, &sub, chunk.clone()),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.received_chunks, 1);
    assert_eq!(b.received_chunks, 1);
    assert!(a.duplicate || b.duplicate);
    assert_eq!(server.metadata().count_chunks("dup-conc").await.unwrap(), 1);
}

#[tokio::test]
async fn test_completion_is_order_independent() {
    let server = TestServer::new().await;
    let id = file_id("order");
    let data = seeded_bytes(7, 500);
    let chunks = split_into_chunks(&data, 100);

    let receipts = submit_in_order(&server, &id, "data.csv", 500, &chunks, &[3, 1, 4, 0, 2]).await;

    let complete: Vec<bool> = receipts.iter().map(|r| r.is_complete).collect();
    assert_eq!(complete, vec![false, false, false, false, true]);
    let counts: Vec<u32> = receipts.iter().map(|r| r.received_chunks).collect();
    assert_eq!(counts, vec![1, 2, 3, 4, 5]);
    assert_eq!(receipts[4].progress, 100);
}

#[tokio::test]
async fn test_concurrent_chunks_complete_once_all_recorded() {
    let server = TestServer::new().await;
    let id = file_id("conc");
    let data = seeded_bytes(8, 600);
    let chunks = split_into_chunks(&data, 100);
    let sub = submission("data.csv", 600, 6);

    let futures = [5u32, 2, 0, 4, 1, 3].map(|index| {
        let coordinator = server.coordinator().clone();
        let sub = sub.clone();
        let id = id.clone();
        let chunk = chunks[index as usize].clone();
        async move { coordinator.submit_chunk(&id, index, &sub, chunk).await }
    });
    let receipts: Vec<ChunkReceipt> = futures::future::join_all(futures)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    assert!(receipts.iter().any(|r| r.is_complete));
    for receipt in &receipts {
        assert_eq!(receipt.is_complete, receipt.received_chunks == 6);
    }
    assert_eq!(server.metadata().count_chunks("conc").await.unwrap(), 6);
}

#[tokio::test]
async fn test_invalid_chunk_touches_nothing() {
    let store = Arc::new(FaultyStore::new());
    let server = TestServer::with_storage(store.clone(), |_| {}).await;
    let id = file_id("invalid");

    let out_of_range = server
        .coordinator()
        .submit_chunk(&id, 3, &submission("a.txt", 10, 3), Bytes::from_static(b"x"))
        .await;
    assert!(matches!(
        out_of_range,
        Err(UploadError::Validation(parcel_core::Error::InvalidChunk(_)))
    ));

    let disallowed = server
        .coordinator()
        .submit_chunk(&id, 0, &submission("setup.exe", 10, 1), Bytes::from_static(b"x"))
        .await;
    assert!(matches!(
        disallowed,
        Err(UploadError::Validation(parcel_core::Error::DisallowedType(_)))
    ));

    assert_eq!(store.chunk_puts(), 0);
    assert!(server.metadata().get_session("invalid").await.unwrap().is_none());
}

#[tokio::test]
async fn test_chunk_count_larger_than_file_is_rejected() {
    let store = Arc::new(FaultyStore::new());
    let server = TestServer::with_storage(store.clone(), |_| {}).await;
    let id = file_id("too-many-chunks");

    let err = server
        .coordinator()
        .submit_chunk(
            &id,
            0,
            &submission("notes.txt", 20, 3_000_000_000),
            Bytes::from_static(b"x"),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        UploadError::Validation(parcel_core::Error::InvalidChunk(_))
    ));

    let err = server
        .coordinator()
        .submit_chunk(&id, 0, &submission("notes.txt", 20, 21), Bytes::from_static(b"x"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        UploadError::Validation(parcel_core::Error::InvalidChunk(_))
    ));

    assert_eq!(store.chunk_puts(), 0);
    assert!(server.metadata().get_session("too-many-chunks").await.unwrap().is_none());
}

#[tokio::test]
async fn test_chunk_count_must_match_session() {
    let server = TestServer::new().await;
    let id = file_id("mismatch-count");

    server
        .coordinator()
        .submit_chunk(&id, 0, &submission("a.txt", 20, 2), Bytes::from_static(b"0123456789"))
        .await
        .unwrap();
    let err = server
        .coordinator()
        .submit_chunk(&id, 1, &submission("a.txt", 30, 3), Bytes::from_static(b"0123456789"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        UploadError::Validation(parcel_core::Error::InvalidChunk(_))
    ));
}

#[tokio::test]
async fn test_failed_chunk_store_is_not_recorded() {
    let store = Arc::new(FaultyStore::new());
    let server = TestServer::with_storage(store.clone(), |_| {}).await;
    let id = file_id("store-fail");
    let sub = submission("a.txt", 20, 2);

    store.fail_chunk_put.store(true, Ordering::SeqCst);
    let err = server
        .coordinator()
        .submit_chunk(&id, 0, &sub, Bytes::from_static(b"0123456789"))
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Storage(_)));
    assert_eq!(server.metadata().count_chunks("store-fail").await.unwrap(), 0);

    store.fail_chunk_put.store(false, Ordering::SeqCst);
    let receipt = server
        .coordinator()
        .submit_chunk(&id, 0, &sub, Bytes::from_static(b"0123456789"))
        .await
        .unwrap();
    assert_eq!(receipt.received_chunks, 1);
    assert!(!receipt.duplicate);
}

// =============================================================================
// Finalize
// =============================================================================

#[tokio::test]
async fn test_finalize_reassembles_scrambled_chunks() {
    let server = TestServer::new().await;
    let id = file_id("reassemble");
    let data = seeded_bytes(42, 10_000);
    let chunks = vec![
        data.slice(0..4_000),
        data.slice(4_000..8_000),
        data.slice(8_000..10_000),
    ];

    submit_in_order(&server, &id, "clip.mp4", 10_000, &chunks, &[2, 0, 1]).await;
    let result = server
        .coordinator()
        .finalize(&id, &FinalizeRequest::default())
        .await
        .unwrap();

    assert!(result.completed);
    assert_eq!(result.filename, "clip.mp4");
    assert_eq!(result.size, 10_000);
    assert_eq!(result.url, format!("/{}", result.slug));
    assert_eq!(result.public_url, format!("https://files.test/{}", result.slug));

    let row = server
        .metadata()
        .get_upload_by_slug(&result.slug)
        .await
        .unwrap()
        .unwrap();
    assert!(row.is_committed());
    let stored = server.state.storage.get(&row.storage_key).await.unwrap();
    assert_eq!(stored, data);

    // Session, ledger and chunk bytes are gone.
    assert!(server.metadata().get_session("reassemble").await.unwrap().is_none());
    assert_eq!(server.metadata().count_chunks("reassemble").await.unwrap(), 0);
    assert!(
        server
            .state
            .storage
            .list("chunks/reassemble/")
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_finalize_request_overrides_session_metadata() {
    let server = TestServer::new().await;
    let id = file_id("overrides");
    let data = seeded_bytes(1, 300);
    let chunks = split_into_chunks(&data, 100);
    submit_in_order(&server, &id, "draft.txt", 300, &chunks, &[0, 1, 2]).await;

    let request = FinalizeRequest {
        file_name: Some("final report.pdf".to_string()),
        file_type: Some("application/pdf".to_string()),
        expires: Some("1h".to_string()),
        domain: Some("SHARE.test".to_string()),
        ..Default::default()
    };
    let result = server.coordinator().finalize(&id, &request).await.unwrap();

    assert_eq!(result.filename, "final_report.pdf");
    assert_eq!(result.content_type, "application/pdf");
    assert_eq!(result.domain, "share.test");
    let lifetime = result.expires_at - time::OffsetDateTime::now_utc();
    assert!(lifetime <= time::Duration::hours(1));
    assert!(lifetime > time::Duration::minutes(59));
}

#[tokio::test]
async fn test_incomplete_finalize_reports_missing_chunks() {
    let server = TestServer::new().await;
    let id = file_id("incomplete");
    let data = seeded_bytes(3, 1_000);
    let chunks = split_into_chunks(&data, 100);

    submit_in_order(&server, &id, "data.csv", 1_000, &chunks, &[0, 2, 3, 5, 6, 7, 9]).await;
    let err = server
        .coordinator()
        .finalize(&id, &FinalizeRequest::default())
        .await
        .unwrap_err();

    match err {
        UploadError::IncompleteUpload {
            received,
            total,
            missing,
        } => {
            assert_eq!(received, 7);
            assert_eq!(total, 10);
            assert_eq!(missing, vec![1, 4, 8]);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // Nothing was thrown away and the session still takes chunks.
    assert_eq!(server.metadata().count_chunks("incomplete").await.unwrap(), 7);
    assert_eq!(
        server.state.storage.list("chunks/incomplete/").await.unwrap().len(),
        7
    );
    let session = server.coordinator().session(&id).await.unwrap();
    assert_eq!(session.state, SessionState::Receiving);

    submit_in_order(&server, &id, "data.csv", 1_000, &chunks, &[1, 4, 8]).await;
    let result = server
        .coordinator()
        .finalize(&id, &FinalizeRequest::default())
        .await
        .unwrap();
    assert_eq!(result.size, 1_000);
}

#[tokio::test]
async fn test_size_mismatch_never_publishes_upload() {
    let ids = Arc::new(ScriptedIds::new(["mism01"]));
    let server = TestServer::with_ids(ids, |_| {}).await;
    let id = file_id("size-mismatch");
    let data = seeded_bytes(5, 9_000);
    let chunks = split_into_chunks(&data, 3_000);

    // Declares 10,000 bytes but sends 9,000.
    submit_in_order(&server, &id, "photo.png", 10_000, &chunks, &[0, 1, 2]).await;
    let err = server
        .coordinator()
        .finalize(&id, &FinalizeRequest::default())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        UploadError::SizeMismatch {
            expected: 10_000,
            actual: 9_000
        }
    ));
    assert!(server.metadata().get_upload_by_slug("mism01").await.unwrap().is_none());

    // The session is kept, but closed.
    let session = server.coordinator().session(&id).await.unwrap();
    assert_eq!(session.state, SessionState::Failed);
    let retry = server
        .coordinator()
        .finalize(&id, &FinalizeRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(
        retry,
        UploadError::SessionBusy {
            state: SessionState::Failed,
            ..
        }
    ));

    let snapshot = server.coordinator().progress(&id).await.unwrap();
    assert_eq!(snapshot.progress, -1);
    assert_eq!(snapshot.phase, UploadPhase::Failed);
    assert!(snapshot.error.unwrap().contains("size mismatch"));
}

#[tokio::test]
async fn test_finalizing_session_rejects_new_work() {
    let server = TestServer::new().await;
    let id = file_id("busy");
    let sub = submission("a.txt", 20, 2);
    server
        .coordinator()
        .submit_chunk(&id, 0, &sub, Bytes::from_static(b"0123456789"))
        .await
        .unwrap();
    server
        .coordinator()
        .submit_chunk(&id, 1, &sub, Bytes::from_static(b"abcdefghij"))
        .await
        .unwrap();

    // Another worker owns the session.
    server
        .metadata()
        .update_state("busy", "finalizing", time::OffsetDateTime::now_utc())
        .await
        .unwrap();

    let err = server
        .coordinator()
        .finalize(&id, &FinalizeRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        UploadError::SessionBusy {
            state: SessionState::Finalizing,
            ..
        }
    ));

    // Retried chunks are still acknowledged.
    let receipt = server
        .coordinator()
        .submit_chunk(&id, 1, &sub, Bytes::from_static(b"abcdefghij"))
        .await
        .unwrap();
    assert!(receipt.duplicate);

    // The failed attempt did not touch the owner's state.
    let session = server.coordinator().session(&id).await.unwrap();
    assert_eq!(session.state, SessionState::Finalizing);
}

#[tokio::test]
async fn test_finalize_unknown_session() {
    let server = TestServer::new().await;
    let err = server
        .coordinator()
        .finalize(&file_id("nope"), &FinalizeRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::NotFound(_)));
}

// =============================================================================
// Commit strategy
// =============================================================================

#[tokio::test]
async fn test_commit_strategy_follows_threshold() {
    let store = Arc::new(FaultyStore::new());
    let server = TestServer::with_storage(store.clone(), small_parts).await;

    server
        .coordinator()
        .upload_simple(simple("at-threshold.txt", None), seeded_bytes(1, 1000))
        .await
        .unwrap();
    assert_eq!(store.multipart_starts(), 0);

    let data = seeded_bytes(2, 1001);
    let result = server
        .coordinator()
        .upload_simple(simple("over-threshold.txt", None), data.clone())
        .await
        .unwrap();
    assert_eq!(store.multipart_starts(), 1);
    assert_eq!(store.inner.pending_uploads(), 0);

    let row = server
        .metadata()
        .get_upload_by_slug(&result.slug)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(store.get(&row.storage_key).await.unwrap(), data);
}

#[tokio::test]
async fn test_part_failure_aborts_and_session_can_retry() {
    let store = Arc::new(FaultyStore::new());
    let ids = Arc::new(ScriptedIds::new(["first1", "second"]));
    let server = TestServer::build_with(store.clone(), ids, small_parts).await;
    let id = file_id("part-fail");
    let data = seeded_bytes(9, 1_500);
    let chunks = split_into_chunks(&data, 500);
    submit_in_order(&server, &id, "clip.mp4", 1_500, &chunks, &[0, 1, 2]).await;

    store.fail_part.store(2, Ordering::SeqCst);
    let err = server
        .coordinator()
        .finalize(&id, &FinalizeRequest::default())
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::Storage(_)));
    assert_eq!(store.aborts(), 1);
    assert_eq!(store.inner.pending_uploads(), 0);
    assert!(server.metadata().get_upload_by_slug("first1").await.unwrap().is_none());
    let session = server.coordinator().session(&id).await.unwrap();
    assert_eq!(session.state, SessionState::Receiving);
    assert_eq!(server.metadata().count_chunks("part-fail").await.unwrap(), 3);

    store.fail_part.store(0, Ordering::SeqCst);
    let result = server
        .coordinator()
        .finalize(&id, &FinalizeRequest::default())
        .await
        .unwrap();
    assert_eq!(result.slug, "second");

    // A result replaces the earlier failure.
    let snapshot = server.coordinator().progress(&id).await.unwrap();
    assert_eq!(snapshot.progress, 100);
    assert_eq!(snapshot.phase, UploadPhase::Completed);
    assert_eq!(snapshot.result.unwrap().slug, "second");
}

#[tokio::test]
async fn test_final_put_failure_leaves_no_placeholder() {
    let store = Arc::new(FaultyStore::new());
    let ids = Arc::new(ScriptedIds::new(["gone01"]));
    let server = TestServer::build_with(store.clone(), ids, |_| {}).await;

    store.fail_final_put.store(true, Ordering::SeqCst);
    let err = server
        .coordinator()
        .upload_simple(simple("a.txt", None), Bytes::from_static(b"hello"))
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::Storage(_)));
    assert!(server.metadata().get_upload_by_slug("gone01").await.unwrap().is_none());
}

#[tokio::test]
async fn test_stalled_commit_times_out() {
    let store = Arc::new(FaultyStore::new());
    let server = TestServer::with_storage(store.clone(), |config| {
        small_parts(config);
        config.server.finalize_timeout_secs = 1;
    })
    .await;

    store.stall_parts.store(true, Ordering::SeqCst);
    let err = server
        .coordinator()
        .upload_simple(simple("big.txt", Some("stalled")), seeded_bytes(4, 2_000))
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::Timeout(_)));
    assert_eq!(store.aborts(), 1);
    let snapshot = server.coordinator().progress(&file_id("stalled")).await.unwrap();
    assert_eq!(snapshot.progress, -1);
}

#[tokio::test]
async fn test_object_written_before_timeout_is_removed() {
    let store = Arc::new(FaultyStore::new());
    let server = TestServer::with_storage(store.clone(), |config| {
        config.server.finalize_timeout_secs = 1;
    })
    .await;

    store.stall_final_put.store(true, Ordering::SeqCst);
    let err = server
        .coordinator()
        .upload_simple(simple("late.txt", Some("late-write")), Bytes::from_static(b"hello"))
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::Timeout(_)));
    assert!(store.keys().await.is_empty(), "orphaned objects: {:?}", store.keys().await);
    let snapshot = server.coordinator().progress(&file_id("late-write")).await.unwrap();
    assert_eq!(snapshot.progress, -1);
}

// =============================================================================
// Link ids
// =============================================================================

#[tokio::test]
async fn test_slug_collisions_are_retried() {
    let ids = Arc::new(ScriptedIds::new(["taken1", "taken1", "taken1", "fresh1"]));
    let server = TestServer::with_ids(ids.clone(), |_| {}).await;

    let first = server
        .coordinator()
        .upload_simple(simple("a.txt", None), Bytes::from_static(b"one"))
        .await
        .unwrap();
    assert_eq!(first.slug, "taken1");

    let second = server
        .coordinator()
        .upload_simple(simple("b.txt", None), Bytes::from_static(b"two"))
        .await
        .unwrap();
    assert_eq!(second.slug, "fresh1");
    assert_eq!(ids.issued(), 4);
}

#[tokio::test]
async fn test_slug_collisions_are_bounded() {
    let ids = Arc::new(ScriptedIds::always("taken1"));
    let server = TestServer::with_ids(ids.clone(), |config| {
        config.server.max_id_attempts = 3;
    })
    .await;

    server
        .coordinator()
        .upload_simple(simple("a.txt", None), Bytes::from_static(b"one"))
        .await
        .unwrap();
    let err = server
        .coordinator()
        .upload_simple(simple("b.txt", None), Bytes::from_static(b"two"))
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::IdGenerationExhausted { attempts: 3 }));
    assert_eq!(ids.issued(), 4);
}

// =============================================================================
// Progress
// =============================================================================

#[tokio::test]
async fn test_chunk_progress_snapshot() {
    let server = TestServer::new().await;
    let id = file_id("snap");
    let data = seeded_bytes(6, 400);
    let chunks = split_into_chunks(&data, 100);

    submit_in_order(&server, &id, "data.csv", 400, &chunks, &[2, 0]).await;
    let snapshot = server.coordinator().progress(&id).await.unwrap();

    assert_eq!(snapshot.progress, 50);
    assert_eq!(snapshot.received_chunks, 2);
    assert_eq!(snapshot.total_chunks, 4);
    assert!(!snapshot.is_complete);
    assert_eq!(snapshot.phase, UploadPhase::Receiving);

    submit_in_order(&server, &id, "data.csv", 400, &chunks, &[1, 3]).await;
    let snapshot = server.coordinator().progress(&id).await.unwrap();
    assert!(snapshot.is_complete);
    assert_eq!(snapshot.phase, UploadPhase::ReadyToFinalize);

    let err = server.coordinator().progress(&file_id("unknown")).await;
    assert!(matches!(err, Err(UploadError::NotFound(_))));
}

#[tokio::test]
async fn test_live_progress_is_monotonic_and_ends_with_result() {
    let server = TestServer::with_config(|config| {
        config.upload.multipart_threshold = 1000;
        config.upload.part_size = 200;
    })
    .await;
    let mut rx = server.state.events.subscribe("live-1");

    let result = server
        .coordinator()
        .upload_simple(simple("movie.mp4", Some("live-1")), seeded_bytes(11, 1_800))
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }

    let progress: Vec<i32> = events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::Progress { progress } => Some(*progress),
            _ => None,
        })
        .collect();
    assert_eq!(progress.first(), Some(&5));
    assert!(progress.contains(&10));
    assert!(progress.windows(2).all(|w| w[0] < w[1]), "{progress:?}");
    assert!(progress.iter().all(|p| *p <= 95));
    assert_eq!(events.last(), Some(&ProgressEvent::Result(result)));

    // The channel closes after the result.
    assert_eq!(server.state.events.channel_count(), 0);
}

#[tokio::test]
async fn test_failure_is_terminal_for_progress() {
    let server = TestServer::new().await;
    let notifier = server.coordinator().notifier().clone();

    notifier.publish_progress("fail-1", 40).await;
    notifier.publish_error("fail-1", "storage unavailable").await;
    notifier.publish_progress("fail-1", 60).await;

    let snapshot = server.coordinator().progress(&file_id("fail-1")).await.unwrap();
    assert_eq!(snapshot.progress, -1);
    assert_eq!(snapshot.phase, UploadPhase::Failed);
    assert_eq!(snapshot.error.as_deref(), Some("storage unavailable"));
}

#[tokio::test]
async fn test_rejected_simple_upload_reports_failure() {
    let server = TestServer::new().await;

    let err = server
        .coordinator()
        .upload_simple(simple("virus.exe", Some("rejected")), Bytes::from_static(b"MZ"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        UploadError::Validation(parcel_core::Error::DisallowedType(_))
    ));

    let snapshot = server.coordinator().progress(&file_id("rejected")).await.unwrap();
    assert_eq!(snapshot.progress, -1);
    assert_eq!(snapshot.phase, UploadPhase::Failed);
}

// =============================================================================
// Sweep
// =============================================================================

#[tokio::test]
async fn test_sweep_removes_idle_sessions() {
    let server = TestServer::with_config(|config| {
        config.server.session_inactivity_secs = 0;
        config.server.progress_ttl_secs = 0;
    })
    .await;
    let id = file_id("idle");
    let data = seeded_bytes(12, 300);
    let chunks = split_into_chunks(&data, 100);
    submit_in_order(&server, &id, "data.csv", 300, &chunks, &[0, 2]).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    let report = server.coordinator().sweep().await.unwrap();

    assert_eq!(report.sessions_removed, 1);
    assert_eq!(report.chunks_removed, 2);
    assert_eq!(report.progress_removed, 1);
    assert_eq!(report.errors, 0);
    assert!(server.metadata().get_session("idle").await.unwrap().is_none());
    assert_eq!(server.metadata().count_chunks("idle").await.unwrap(), 0);
    assert!(server.state.storage.list("chunks/idle/").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sweep_keeps_active_sessions() {
    let server = TestServer::new().await;
    let id = file_id("active");
    let data = seeded_bytes(13, 200);
    let chunks = split_into_chunks(&data, 100);
    submit_in_order(&server, &id, "data.csv", 200, &chunks, &[1]).await;

    let report = server.coordinator().sweep().await.unwrap();

    assert_eq!(report.sessions_removed, 0);
    assert_eq!(report.chunks_removed, 0);
    assert!(server.metadata().get_session("active").await.unwrap().is_some());
    assert_eq!(server.metadata().count_chunks("active").await.unwrap(), 1);
}
