//! End-to-end scenarios for the object-reader state machine, driven on a
//! current-thread runtime the way the gateway's reactor drives it.

use std::sync::Arc;

use ogw_read::test_support::{
    ScriptedStore, RecordingStore, make_engine, make_object_id, make_request_id,
};
use ogw_read::{
    BufferEngine, Extent, LayoutId, ObjectId, ObjectReader, ObjectStore, ReadError, ReaderState,
    StorePhase,
};

fn reader_for(
    store: Arc<dyn ObjectStore>,
    engine: BufferEngine,
    object: ObjectId,
    layout: LayoutId,
) -> ObjectReader {
    ObjectReader::new(make_request_id("req-e2e"), object, layout, store, engine)
        .expect("reader construction")
}

#[tokio::test]
async fn four_blocks_through_512_byte_transport_units() {
    // Layout id 1 = 1 KiB store blocks; 512 B transport units; 4 blocks
    // therefore bind 8 scatter-gather slots.
    let engine = make_engine(512, u64::MAX);
    let store = Arc::new(RecordingStore::new());
    let object = make_object_id(1);
    let body: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
    store.put_object(object, LayoutId::new(1), body.clone());

    let mut reader = reader_for(
        Arc::clone(&store) as Arc<dyn ObjectStore>,
        engine.clone(),
        object,
        LayoutId::new(1),
    );
    assert_eq!(reader.state(), ReaderState::Start);
    assert_eq!(reader.layout_unit_bytes(), 1024);

    reader.open().await.expect("open");
    let bytes = reader.read_object_data(4).await.expect("read");
    assert_eq!(bytes, 4096);
    assert_eq!(reader.state(), ReaderState::Success);

    // The store saw one batch of eight contiguous 512-byte extents.
    let batches = store.batches();
    assert_eq!(batches.len(), 1);
    let expected: Vec<Extent> = (0..8).map(|i| Extent::new(i * 512, 512)).collect();
    assert_eq!(batches[0].extents, expected);
    assert_eq!(batches[0].data_lens, vec![512; 8]);
    assert!(batches[0].attrs.iter().all(|&count| count == 0));

    // Iteration yields the eight units in bind order, then the sentinel.
    let mut seen = Vec::new();
    let first = reader.first_block().expect("first block");
    assert_eq!(first.len(), 512);
    seen.extend_from_slice(first);
    for _ in 0..7 {
        let block = reader.next_block().expect("next block");
        assert_eq!(block.len(), 512);
        seen.extend_from_slice(block);
    }
    assert!(reader.next_block().is_none());
    assert_eq!(seen, body);

    let snapshot = reader.metrics();
    assert_eq!(snapshot.reads_launched, 1);
    assert_eq!(snapshot.reads_completed, 1);
    assert_eq!(snapshot.bytes_read, 4096);
}

#[tokio::test]
async fn cursor_accumulates_across_sequential_reads() {
    let engine = make_engine(512, u64::MAX);
    let store = Arc::new(RecordingStore::new());
    let object = make_object_id(2);
    store.put_object(object, LayoutId::new(1), vec![7u8; 8192]);

    let mut reader = reader_for(
        Arc::clone(&store) as Arc<dyn ObjectStore>,
        engine,
        object,
        LayoutId::new(1),
    );
    reader.open().await.expect("open");

    // Three reads of two 1 KiB blocks each.
    for n in 1..=3u64 {
        let bytes = reader.read_object_data(2).await.expect("read");
        assert_eq!(bytes, 2048);
        assert_eq!(reader.last_index(), n * 2048);
    }

    // Each read continued where the previous stopped.
    let batches = store.batches();
    assert_eq!(batches.len(), 3);
    assert_eq!(batches[0].extents[0].offset, 0);
    assert_eq!(batches[1].extents[0].offset, 2048);
    assert_eq!(batches[2].extents[0].offset, 4096);
}

#[tokio::test]
async fn set_last_index_positions_a_range_read() {
    let engine = make_engine(512, u64::MAX);
    let store = Arc::new(RecordingStore::new());
    let object = make_object_id(3);
    store.put_object(object, LayoutId::new(1), vec![9u8; 4096]);

    let mut reader = reader_for(
        Arc::clone(&store) as Arc<dyn ObjectStore>,
        engine,
        object,
        LayoutId::new(1),
    );
    reader.open().await.expect("open");
    reader.set_last_index(1024);
    reader.read_object_data(1).await.expect("read");

    let batches = store.batches();
    assert_eq!(batches[0].extents[0], Extent::new(1024, 512));
    assert_eq!(reader.last_index(), 2048);
}

#[tokio::test]
async fn missing_at_open_is_terminal() {
    let engine = make_engine(512, u64::MAX);
    let store = Arc::new(RecordingStore::new());
    let object = make_object_id(4);

    let mut reader = reader_for(
        Arc::clone(&store) as Arc<dyn ObjectStore>,
        engine,
        object,
        LayoutId::new(1),
    );
    let err = reader.check_object_exist().await.expect_err("missing");
    assert_eq!(err, ReadError::NotFound(StorePhase::Open));
    assert_eq!(reader.state(), ReaderState::Missing);
    assert!(!reader.is_opened());
    assert_eq!(store.open_calls(), 1);
}

#[tokio::test]
async fn store_error_at_open_is_failed() {
    let engine = make_engine(512, u64::MAX);
    let store = Arc::new(ScriptedStore::new(LayoutId::new(1), 4096));
    store.push_open(Err(ReadError::store(StorePhase::Open, "io timeout")));

    let mut reader = reader_for(
        Arc::clone(&store) as Arc<dyn ObjectStore>,
        engine,
        make_object_id(5),
        LayoutId::new(1),
    );
    let err = reader.open().await.expect_err("store error");
    assert!(matches!(err, ReadError::Store { phase: StorePhase::Open, .. }));
    assert_eq!(reader.state(), ReaderState::Failed);
}

#[tokio::test]
async fn object_vanishing_mid_stream_is_missing_at_read() {
    let engine = make_engine(512, u64::MAX);
    let store = Arc::new(RecordingStore::new());
    let object = make_object_id(6);
    store.put_object(object, LayoutId::new(1), vec![1u8; 2048]);

    let mut reader = reader_for(
        Arc::clone(&store) as Arc<dyn ObjectStore>,
        engine,
        object,
        LayoutId::new(1),
    );
    reader.open().await.expect("open");

    // Concurrent delete between open and read.
    assert!(store.remove_object(object));
    let err = reader.read_object_data(1).await.expect_err("vanished");
    assert_eq!(err, ReadError::NotFound(StorePhase::Read));
    assert_eq!(reader.state(), ReaderState::Missing);

    let snapshot = reader.metrics();
    assert_eq!(snapshot.reads_launched, 1);
    assert_eq!(snapshot.reads_failed, 1);
    assert_eq!(snapshot.reads_completed, 0);
}

#[tokio::test]
async fn scripted_read_failure_fires_failure_path_once() {
    let engine = make_engine(512, u64::MAX);
    let store = Arc::new(ScriptedStore::new(LayoutId::new(1), 4096));
    store.push_open(Ok(()));
    store.push_read(Err(ReadError::not_found(StorePhase::Read)));

    let mut reader = reader_for(
        Arc::clone(&store) as Arc<dyn ObjectStore>,
        engine,
        make_object_id(7),
        LayoutId::new(1),
    );
    reader.open().await.expect("open");
    let err = reader.read_object_data(2).await.expect_err("not found");
    assert_eq!(err, ReadError::NotFound(StorePhase::Read));
    assert_eq!(reader.state(), ReaderState::Missing);
    assert_eq!(store.read_calls(), 1);

    // Exactly one failure, no success, for the one launched read.
    let snapshot = reader.metrics();
    assert_eq!(snapshot.reads_failed, 1);
    assert_eq!(snapshot.reads_completed, 0);
}

#[tokio::test]
async fn buffer_ownership_leaves_the_reader_once() {
    let engine = make_engine(512, u64::MAX);
    let store = Arc::new(RecordingStore::new());
    let object = make_object_id(8);
    let body: Vec<u8> = (0..2048u32).map(|i| (i % 7) as u8).collect();
    store.put_object(object, LayoutId::new(1), body.clone());

    let mut reader = reader_for(
        Arc::clone(&store) as Arc<dyn ObjectStore>,
        engine.clone(),
        object,
        LayoutId::new(1),
    );
    reader.open().await.expect("open");
    reader.read_object_data(2).await.expect("read");

    let owned = reader.take_buffer().expect("first transfer");
    assert_eq!(owned.len(), 2048);
    assert_eq!(owned.copy_to_vec(), body);
    assert!(reader.take_buffer().is_none());

    // The transferee holds the memory now; dropping the reader must not
    // return it.
    drop(reader);
    assert_eq!(engine.outstanding_units(), 4);
    assert!(engine.budget().used() > 0);
    drop(owned);
    assert_eq!(engine.outstanding_units(), 0);
    assert_eq!(engine.budget().used(), 0);
}

#[tokio::test]
async fn range_shaping_with_drain_and_consume_front() {
    let engine = make_engine(512, u64::MAX);
    let store = Arc::new(RecordingStore::new());
    let object = make_object_id(9);
    let body: Vec<u8> = (0..2048u32).map(|i| (i / 512) as u8).collect();
    store.put_object(object, LayoutId::new(1), body.clone());

    let mut reader = reader_for(
        Arc::clone(&store) as Arc<dyn ObjectStore>,
        engine,
        object,
        LayoutId::new(1),
    );
    reader.open().await.expect("open");
    reader.read_object_data(2).await.expect("read");

    // A range request starting 100 bytes into the first transport unit:
    // skip the prefix, then carve a 1000-byte chunk for the first send.
    let buffer = reader.buffer_mut().expect("buffer");
    buffer.drain(100).expect("drain");
    assert_eq!(buffer.len(), 1948);

    let chunk = buffer.consume_front(1000).expect("consume");
    assert_eq!(chunk.len(), 1000);
    assert_eq!(buffer.len(), 948);

    let mut sent = Vec::new();
    for i in 0..chunk.nvecs() {
        sent.extend_from_slice(chunk.unit(i).expect("chunk unit"));
    }
    assert_eq!(sent, body[100..1100]);
}

#[tokio::test]
async fn partial_final_unit_binds_short() {
    // 1 KiB blocks over 2 KiB transport units: 3 blocks = 3072 bytes needs
    // ceil(3072/2048) = 2 units, the last one only half used.
    let engine = make_engine(2048, u64::MAX);
    let store = Arc::new(RecordingStore::new());
    let object = make_object_id(10);
    store.put_object(object, LayoutId::new(1), vec![3u8; 3072]);

    let mut reader = reader_for(
        Arc::clone(&store) as Arc<dyn ObjectStore>,
        engine,
        object,
        LayoutId::new(1),
    );
    reader.open().await.expect("open");
    let bytes = reader.read_object_data(3).await.expect("read");
    assert_eq!(bytes, 3072);

    let batches = store.batches();
    assert_eq!(
        batches[0].extents,
        vec![Extent::new(0, 2048), Extent::new(2048, 1024)]
    );

    assert_eq!(reader.first_block().map(<[u8]>::len), Some(2048));
    assert_eq!(reader.next_block().map(<[u8]>::len), Some(1024));
    assert!(reader.next_block().is_none());
}
