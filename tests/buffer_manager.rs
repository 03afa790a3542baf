//! # Buffer Manager Test Suite
//!
//! The manager as the rest of the engine sees it: tuple source lifecycle,
//! status, thread-scoped pins, memory pressure and LOB bodies.
//!
//! ## Usage
//!
//! ```sh
//! cargo test --test buffer_manager
//! ```

use std::time::Duration;

use querybuf::buffer::StorageType;
use querybuf::config::MIN_MEMORY_AVAILABLE;
use querybuf::types::{LobValue, Tuple};
use querybuf::{
    BufferConfig, BufferError, BufferManager, DataType, TupleSourceKind, TupleSourceStatus, Value,
};
use tempfile::tempdir;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Large enough that three rows fit the minimum budget and a fourth does not.
const WIDE_ROW_BYTES: usize = 300_000;

fn quiet() -> BufferConfig {
    BufferConfig::new().management_interval(Duration::from_secs(3600))
}

fn wide_row(fill: u8) -> Tuple {
    vec![Value::Varbinary(vec![fill; WIDE_ROW_BYTES])]
}

fn ints(manager: &BufferManager, group: &str) -> querybuf::TupleSourceId {
    manager
        .create_tuple_source(vec![DataType::Integer], group, TupleSourceKind::Processor)
        .expect("create tuple source")
}

// ============================================================================
// LIFECYCLE
// ============================================================================

mod lifecycle {
    use super::*;

    #[test]
    fn produce_close_and_read_back() {
        let manager = BufferManager::new(quiet().processor_batch_size(3)).unwrap();
        let id = ints(&manager, "session-1");

        manager
            .add_tuple_batch(&id, (1..=7).map(|v| vec![Value::Integer(v)]).collect())
            .unwrap();
        assert_eq!(manager.status(&id).unwrap(), TupleSourceStatus::Active);
        manager.set_status(&id, TupleSourceStatus::Full).unwrap();
        assert_eq!(manager.row_count(&id).unwrap(), 7);

        let mut cursor = manager.cursor(&id).unwrap();
        let mut seen = Vec::new();
        while let Some(row) = cursor.next_tuple().unwrap() {
            seen.push(row[0].clone());
        }
        assert_eq!(seen, (1..=7).map(Value::Integer).collect::<Vec<_>>());
    }

    #[test]
    fn full_source_rejects_rows_and_reactivation() {
        let manager = BufferManager::new(quiet()).unwrap();
        let id = ints(&manager, "g");
        manager.set_status(&id, TupleSourceStatus::Full).unwrap();

        let err = manager.add_tuple(&id, vec![Value::Integer(1)]).unwrap_err();
        assert!(BufferError::is_closed(&err));
        assert!(manager.set_status(&id, TupleSourceStatus::Active).is_err());
    }

    #[test]
    fn group_removal_takes_only_that_group() {
        let manager = BufferManager::new(quiet()).unwrap();
        let a1 = ints(&manager, "a");
        let a2 = ints(&manager, "a");
        let b = ints(&manager, "b");

        assert_eq!(manager.remove_tuple_sources("a").unwrap(), 2);
        assert_eq!(manager.tuple_source_count(), 1);
        assert!(BufferError::is_not_found(&manager.row_count(&a1).unwrap_err()));
        assert!(manager.row_count(&b).is_ok());

        manager.remove_tuple_source(&a2).unwrap();
        assert_eq!(manager.remove_tuple_sources("a").unwrap(), 0);
    }

    #[test]
    fn ids_are_parsed_back_to_the_same_source() {
        let manager = BufferManager::new(quiet().location("node-7")).unwrap();
        let id = ints(&manager, "g");
        manager.add_tuple(&id, vec![Value::Integer(5)]).unwrap();

        let parsed: querybuf::TupleSourceId = id.string_id().parse().unwrap();
        assert_eq!(parsed.location(), Some("node-7"));
        assert_eq!(manager.row_count(&parsed).unwrap(), 1);
    }

    #[test]
    fn config_from_properties_drives_batch_sizes() {
        let config = BufferConfig::from_properties([
            ("buffer.processor_batch_size", "4"),
            ("buffer.connector_batch_size", "9"),
            ("buffer.memory_available", "2MB"),
        ])
        .unwrap();
        let manager = BufferManager::new(config).unwrap();
        assert_eq!(manager.processor_batch_size(), 4);
        assert_eq!(manager.connector_batch_size(), 9);
        assert_eq!(manager.memory_stats().total_limit, 2 * 1024 * 1024);
    }

    #[test]
    fn stop_drops_everything() {
        let manager = BufferManager::new(quiet()).unwrap();
        let id = ints(&manager, "g");
        manager.add_tuple(&id, vec![Value::Integer(1)]).unwrap();
        manager.set_status(&id, TupleSourceStatus::Full).unwrap();

        manager.stop().unwrap();
        assert_eq!(manager.tuple_source_count(), 0);
        assert_eq!(manager.memory_stats().total_used, 0);
    }
}

// ============================================================================
// PINS AND MEMORY
// ============================================================================

mod pins {
    use super::*;

    fn spilling_manager(dir: &std::path::Path) -> BufferManager {
        BufferManager::new(
            quiet()
                .memory_available(MIN_MEMORY_AVAILABLE)
                .processor_batch_size(1)
                .storage_directory(dir),
        )
        .unwrap()
    }

    #[test]
    fn rows_that_do_not_fit_go_to_the_file_tier() {
        let dir = tempdir().unwrap();
        let manager = spilling_manager(dir.path());
        let id = manager
            .create_tuple_source(vec![DataType::Varbinary], "g", TupleSourceKind::Processor)
            .unwrap();
        for fill in 1..=4 {
            manager.add_tuple(&id, wide_row(fill)).unwrap();
        }

        let buffer = manager.tuple_buffer(&id).unwrap();
        assert_eq!(buffer.batch_tier(1), Some(StorageType::Memory));
        assert_eq!(buffer.batch_tier(4), Some(StorageType::File));
        assert_eq!(manager.get_batch(&id, 4).unwrap().tuple(4), &wide_row(4));
    }

    #[test]
    fn pin_beyond_the_budget_is_refused() {
        let dir = tempdir().unwrap();
        let manager = spilling_manager(dir.path());
        let id = manager
            .create_tuple_source(vec![DataType::Varbinary], "g", TupleSourceKind::Processor)
            .unwrap();
        for fill in 1..=4 {
            manager.add_tuple(&id, wide_row(fill)).unwrap();
        }

        let err = manager.pin_tuple_batch(&id, 4).unwrap_err();
        assert!(BufferError::is_memory_not_available(&err));

        let pinned = manager.pin_tuple_batch(&id, 1).unwrap();
        assert_eq!(pinned.begin_row, 1);
        assert_eq!(manager.release_pinned_batches(), 1);
    }

    #[test]
    fn failed_bulk_append_keeps_every_row() {
        let manager = BufferManager::new(
            quiet()
                .memory_available(MIN_MEMORY_AVAILABLE)
                .processor_batch_size(1),
        )
        .unwrap();
        let id = manager
            .create_tuple_source(vec![DataType::Varbinary], "g", TupleSourceKind::Processor)
            .unwrap();

        let err = manager
            .add_tuple_batch(&id, (1..=5).map(wide_row).collect())
            .unwrap_err();
        assert!(BufferError::is_memory_not_available(&err));
        assert_eq!(manager.row_count(&id).unwrap(), 5);

        for row in 1..=5i64 {
            let batch = manager.get_batch(&id, row).unwrap();
            assert_eq!(batch.tuple(row), &wide_row(row as u8), "row {row}");
        }
    }

    #[test]
    fn pinning_unsaved_rows_is_blocked_until_final() {
        let manager = BufferManager::new(quiet().processor_batch_size(10)).unwrap();
        let id = ints(&manager, "g");
        manager.add_tuple(&id, vec![Value::Integer(1)]).unwrap();

        let err = manager.pin_tuple_batch(&id, 1).unwrap_err();
        assert!(BufferError::is_blocked(&err));

        manager.set_status(&id, TupleSourceStatus::Full).unwrap();
        assert!(manager.pin_tuple_batch(&id, 1).is_ok());
        assert!(BufferError::is_not_found(
            &manager.pin_tuple_batch(&id, 2).unwrap_err()
        ));
    }

    #[test]
    fn release_only_touches_the_calling_thread() {
        let manager = BufferManager::new(quiet().processor_batch_size(1)).unwrap();
        let id = ints(&manager, "g");
        manager
            .add_tuple_batch(&id, vec![vec![Value::Integer(1)], vec![Value::Integer(2)]])
            .unwrap();

        manager.pin_tuple_batch(&id, 1).unwrap();

        std::thread::scope(|scope| {
            scope
                .spawn(|| {
                    manager.pin_tuple_batch(&id, 2).unwrap();
                    assert_eq!(manager.release_pinned_batches(), 1);
                    assert!(manager.unpin_tuple_batch(&id, 1).is_err());
                })
                .join()
                .unwrap();
        });

        manager.unpin_tuple_batch(&id, 1).unwrap();
        assert!(manager.unpin_tuple_batch(&id, 1).is_err());
        assert_eq!(manager.release_pinned_batches(), 0);
    }

    #[test]
    fn manage_memory_spills_down_to_the_threshold() {
        let dir = tempdir().unwrap();
        let manager = BufferManager::new(
            quiet()
                .memory_available(MIN_MEMORY_AVAILABLE)
                .active_memory_threshold(50)
                .processor_batch_size(1)
                .storage_directory(dir.path()),
        )
        .unwrap();
        let id = manager
            .create_tuple_source(vec![DataType::Varbinary], "g", TupleSourceKind::Processor)
            .unwrap();
        for fill in 1..=3 {
            manager.add_tuple(&id, wide_row(fill)).unwrap();
        }
        assert!(manager.memory_stats().utilization_percent() > 50.0);

        let freed = manager.manage_memory().unwrap();
        assert!(freed > 0);
        assert!(manager.memory_stats().utilization_percent() <= 50.0);
        assert_eq!(
            manager.tuple_buffer(&id).unwrap().batch_tier(1),
            Some(StorageType::File)
        );

        for fill in 1..=3 {
            assert_eq!(
                manager.get_batch(&id, fill as i64).unwrap().tuple(fill as i64),
                &wide_row(fill)
            );
        }
    }
}

// ============================================================================
// LOB BODIES
// ============================================================================

mod lobs {
    use super::*;

    #[test]
    fn body_round_trips_in_chunks() {
        let manager = BufferManager::new(quiet()).unwrap();
        let body_id = manager.create_lob_buffer("g").unwrap();
        let payload: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        manager.write_lob(&body_id, &payload[..12_345]).unwrap();
        manager.write_lob(&body_id, &payload[12_345..]).unwrap();

        let lob = manager.finish_lob(&body_id).unwrap();
        assert_eq!(lob.length(), Some(payload.len() as u64));
        assert_eq!(manager.read_lob(&lob).unwrap(), payload);
        assert_eq!(
            manager.read_lob(&LobValue::inline(b"small".to_vec())).unwrap(),
            b"small"
        );
    }

    #[test]
    fn only_lob_buffers_take_lob_writes() {
        let manager = BufferManager::new(quiet()).unwrap();
        let id = ints(&manager, "g");
        assert!(manager.write_lob(&id, b"x").is_err());
    }

    #[test]
    fn body_is_cleaned_up_after_its_last_handle() {
        let manager = BufferManager::new(quiet().lob_cleanup_batch(1)).unwrap();

        let first = manager.create_lob_buffer("g").unwrap();
        manager.write_lob(&first, b"one").unwrap();
        let first_lob = manager.finish_lob(&first).unwrap();
        let second = manager.create_lob_buffer("g").unwrap();
        manager.write_lob(&second, b"two").unwrap();
        let second_lob = manager.finish_lob(&second).unwrap();

        let copy = first_lob.clone();
        drop(first_lob);
        assert_eq!(manager.cleanup_lobs().unwrap(), 0);
        assert_eq!(manager.read_lob(&copy).unwrap(), b"one");

        drop(copy);
        drop(second_lob);
        assert_eq!(manager.cleanup_lobs().unwrap(), 1);
        assert_eq!(manager.cleanup_lobs().unwrap(), 1);
        assert_eq!(manager.cleanup_lobs().unwrap(), 0);
        assert!(BufferError::is_not_found(&manager.row_count(&first).unwrap_err()));
        assert!(BufferError::is_not_found(&manager.row_count(&second).unwrap_err()));
    }

    #[test]
    fn body_held_by_a_row_lives_until_the_row_is_gone() {
        let manager = BufferManager::new(quiet().processor_batch_size(1)).unwrap();
        let body_id = manager.create_lob_buffer("g").unwrap();
        manager.write_lob(&body_id, b"payload").unwrap();
        let lob = manager.finish_lob(&body_id).unwrap();

        let rows = manager
            .create_tuple_source(vec![DataType::Blob], "g", TupleSourceKind::Processor)
            .unwrap();
        manager.add_tuple(&rows, vec![Value::Blob(lob)]).unwrap();
        assert_eq!(manager.cleanup_lobs().unwrap(), 0);

        let stored = manager.get_batch(&rows, 1).unwrap();
        let stored_lob = stored.tuple(1)[0].as_lob().cloned().unwrap();
        assert!(stored_lob.reference_id.is_some());
        assert_eq!(manager.read_lob(&stored_lob).unwrap(), b"payload");
        drop(stored_lob);
        drop(stored);

        manager.remove_tuple_source(&rows).unwrap();
        assert_eq!(manager.cleanup_lobs().unwrap(), 1);
        assert!(BufferError::is_not_found(&manager.row_count(&body_id).unwrap_err()));
    }
}
