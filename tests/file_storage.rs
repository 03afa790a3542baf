//! # Spill Tier Test Suite
//!
//! Batches that leave the memory tier must come back unchanged: plain
//! values byte for byte, LOB values with their payload restored through the
//! owning buffer's reference map.
//!
//! ## Usage
//!
//! ```sh
//! cargo test --test file_storage
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use querybuf::buffer::{FileStorageManager, StorageManager, StorageType};
use querybuf::config::MIN_MEMORY_AVAILABLE;
use querybuf::types::{LobValue, Tuple};
use querybuf::{
    BufferConfig, BufferManager, DataType, TupleBatch, TupleSourceId, TupleSourceKind,
    TupleSourceStatus, Value,
};
use tempfile::tempdir;

const SCHEMA: [DataType; 4] = [
    DataType::Integer,
    DataType::String,
    DataType::Double,
    DataType::Timestamp,
];

fn sample_rows(n: i32) -> Vec<Tuple> {
    (1..=n)
        .map(|i| {
            vec![
                Value::Integer(i),
                Value::String(format!("customer-{:04}", i)),
                if i % 7 == 0 {
                    Value::Null
                } else {
                    Value::Double(i as f64 / 8.0)
                },
                Value::Timestamp(1_600_000_000_000_000 + i as i64),
            ]
        })
        .collect()
}

/// A manager whose per-group share is tiny, so nearly every batch spills.
fn spilling_manager(dir: &Path) -> BufferManager {
    BufferManager::new(
        BufferConfig::new()
            .memory_available(MIN_MEMORY_AVAILABLE)
            .session_use_percentage(1)
            .management_interval(Duration::from_secs(3600))
            .processor_batch_size(50)
            .storage_directory(dir),
    )
    .expect("spilling manager")
}

fn read_all(manager: &BufferManager, id: &TupleSourceId) -> Vec<Tuple> {
    let mut cursor = manager.cursor(id).expect("cursor");
    let mut rows = Vec::new();
    while let Some(row) = cursor.next_tuple().expect("read") {
        rows.push(row);
    }
    rows
}

fn spill_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|e| e.path().extension().is_some_and(|ext| ext == "spill"))
                .count()
        })
        .unwrap_or(0)
}

#[test]
fn spilled_content_equals_memory_content() {
    let dir = tempdir().unwrap();
    let spilling = spilling_manager(dir.path());
    let resident = BufferManager::new(BufferConfig::new().processor_batch_size(50)).unwrap();

    let mut ids = Vec::new();
    for manager in [&spilling, &resident] {
        let id = manager
            .create_tuple_source(SCHEMA.to_vec(), "g", TupleSourceKind::Processor)
            .unwrap();
        manager.add_tuple_batch(&id, sample_rows(200)).unwrap();
        manager.set_status(&id, TupleSourceStatus::Full).unwrap();
        ids.push(id);
    }

    let spilled_buffer = spilling.tuple_buffer(&ids[0]).unwrap();
    assert_eq!(spilled_buffer.batch_tier(151), Some(StorageType::File));
    assert_eq!(
        resident.tuple_buffer(&ids[1]).unwrap().batch_tier(151),
        Some(StorageType::Memory)
    );

    assert_eq!(read_all(&spilling, &ids[0]), read_all(&resident, &ids[1]));

    // The first read cached the spilled payloads; drop them and read again.
    assert!(spilled_buffer.reclaim_cached() > 0);
    assert_eq!(read_all(&spilling, &ids[0]), sample_rows(200));
}

#[test]
fn lob_payload_survives_the_file_tier() {
    let dir = tempdir().unwrap();
    let manager = spilling_manager(dir.path());
    let id = manager
        .create_tuple_source(
            vec![DataType::Integer, DataType::Clob],
            "g",
            TupleSourceKind::Processor,
        )
        .unwrap();

    let text = "x".repeat(20_000);
    manager
        .add_tuple(
            &id,
            vec![Value::Integer(1), Value::Clob(LobValue::inline(text.as_bytes().to_vec()))],
        )
        .unwrap();
    manager.set_status(&id, TupleSourceStatus::Full).unwrap();

    let buffer = manager.tuple_buffer(&id).unwrap();
    assert_eq!(buffer.batch_tier(1), Some(StorageType::File));
    buffer.reclaim_cached();

    let rows = read_all(&manager, &id);
    let lob = rows[0][1].as_lob().expect("clob column");
    let reference_id = lob.reference_id.clone().expect("reference minted on save");
    assert_eq!(lob.inline_bytes(), Some(text.as_bytes()));
    assert_eq!(
        buffer
            .lob_reference(&reference_id)
            .and_then(|registered| registered.length()),
        Some(text.len() as u64)
    );
}

#[test]
fn repeated_lob_reference_shares_one_payload() {
    let dir = tempdir().unwrap();
    let manager = spilling_manager(dir.path());
    let id = manager
        .create_tuple_source(vec![DataType::Blob], "g", TupleSourceKind::Processor)
        .unwrap();

    manager
        .add_tuple(&id, vec![Value::Blob(LobValue::inline(vec![7u8; 64]))])
        .unwrap();
    let buffer = manager.tuple_buffer(&id).unwrap();
    buffer.save_batch(false).unwrap();

    let first = manager.get_batch(&id, 1).unwrap();
    let reference_id = first.tuple(1)[0]
        .as_lob()
        .and_then(|lob| lob.reference_id.clone())
        .unwrap();

    manager
        .add_tuple(&id, vec![Value::Blob(LobValue::reference(reference_id.clone()))])
        .unwrap();
    manager.set_status(&id, TupleSourceStatus::Full).unwrap();
    buffer.reclaim_cached();

    let rows = read_all(&manager, &id);
    assert_eq!(rows.len(), 2);
    for row in &rows {
        let lob = row[0].as_lob().unwrap();
        assert_eq!(lob.reference_id.as_deref(), Some(reference_id.as_str()));
        assert_eq!(lob.inline_bytes(), Some(&[7u8; 64][..]));
    }
}

#[test]
fn removal_and_stop_delete_spill_files() {
    let dir = tempdir().unwrap();
    let manager = spilling_manager(dir.path());

    let keep = manager
        .create_tuple_source(SCHEMA.to_vec(), "a", TupleSourceKind::Processor)
        .unwrap();
    let drop_me = manager
        .create_tuple_source(SCHEMA.to_vec(), "b", TupleSourceKind::Processor)
        .unwrap();
    for id in [&keep, &drop_me] {
        manager.add_tuple_batch(id, sample_rows(200)).unwrap();
    }
    let before = spill_files(dir.path());
    assert!(before >= 2);

    manager.remove_tuple_source(&drop_me).unwrap();
    let after_remove = spill_files(dir.path());
    assert!(after_remove < before);
    assert!(after_remove >= 1);

    manager.stop().unwrap();
    assert_eq!(spill_files(dir.path()), 0);
}

#[test]
fn storage_manager_serves_exact_begin_rows() {
    let dir = tempdir().unwrap();
    let storage = FileStorageManager::new(dir.path().join("spill"), 2, 64 * 1024);
    let id = TupleSourceId::new("17", Some("node"));
    let types = SCHEMA;

    let rows = sample_rows(30);
    for (n, chunk) in rows.chunks(10).enumerate() {
        let batch = TupleBatch::new(1 + 10 * n as i64, chunk.to_vec());
        storage.add_batch(&id, Arc::new(batch), &types).unwrap();
    }
    assert!(storage.open_file_count() <= 2);

    let middle = storage.get_batch(&id, 11, &types).unwrap();
    assert_eq!(middle.begin_row(), 11);
    assert_eq!(middle.tuples(), &rows[10..20]);
    assert!(storage.get_batch(&id, 12, &types).is_err());

    storage.remove_batch(&id, 11).unwrap();
    assert!(storage.get_batch(&id, 11, &types).is_err());
    assert!(storage.get_batch(&id, 21, &types).is_ok());

    storage.remove_batches(&id).unwrap();
    storage.remove_batches(&id).unwrap();
    assert_eq!(storage.file_count(), 0);
    assert_eq!(spill_files(&dir.path().join("spill")), 0);
}
