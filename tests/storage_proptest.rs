use chorus::raft::LogEntry;
use chorus::storage::{MemoryStorage, SledStorage, Storage};
use proptest::prelude::*;
use tempfile::TempDir;

#[derive(Debug, Clone)]
enum LogOp {
    Append { term: u64, count: usize },
    Truncate { index: u64 },
}

fn log_op_strategy() -> impl Strategy<Value = LogOp> {
    prop_oneof![
        (1u64..10, 1usize..4).prop_map(|(term, count)| LogOp::Append { term, count }),
        (1u64..30).prop_map(|index| LogOp::Truncate { index }),
    ]
}

/// Applies `ops` to `storage` and to a plain vector of terms, then checks
/// they describe the same log.
fn check_against_shadow<S: Storage>(
    storage: &mut S,
    ops: Vec<LogOp>,
) -> Result<(), TestCaseError> {
    let mut shadow: Vec<u64> = Vec::new();

    for op in ops {
        match op {
            LogOp::Append { term, count } => {
                let start = shadow.len() as u64 + 1;
                let entries: Vec<LogEntry> = (0..count as u64)
                    .map(|i| LogEntry::new(start + i, term, (start + i).to_be_bytes().to_vec()))
                    .collect();
                storage.write_logs(&entries).expect("contiguous append");
                shadow.extend(std::iter::repeat(term).take(count));
            }
            LogOp::Truncate { index } => {
                storage.delete_logs_from(index).expect("truncate");
                if (index as usize) <= shadow.len() {
                    shadow.truncate(index as usize - 1);
                }
            }
        }

        // A gap is always refused.
        let gap = LogEntry::new(shadow.len() as u64 + 2, 1, Vec::new());
        prop_assert!(storage.write_log(&gap).is_err());
    }

    let last = storage.last_log_index().expect("last index");
    prop_assert_eq!(last as usize, shadow.len());
    prop_assert_eq!(storage.log_term(0).expect("sentinel"), Some(0));
    prop_assert_eq!(
        storage.last_log_term().expect("last term"),
        shadow.last().copied().unwrap_or(0)
    );

    for (i, term) in shadow.iter().enumerate() {
        let index = i as u64 + 1;
        let entry = storage.log(index).expect("read").expect("entry must exist");
        prop_assert_eq!(entry.index, index);
        prop_assert_eq!(entry.term, *term, "term mismatch at index {}", index);
        prop_assert_eq!(entry.data, index.to_be_bytes().to_vec());
    }

    for index in (last + 1)..=(last + 5) {
        prop_assert!(storage.log(index).expect("read").is_none());
        prop_assert!(storage.log_term(index).expect("read").is_none());
    }

    let tail = storage.logs_from(last / 2 + 1).expect("tail");
    prop_assert_eq!(tail.len() as u64, last - last / 2);
    Ok(())
}

proptest! {
    #[test]
    fn memory_log_matches_shadow(ops in proptest::collection::vec(log_op_strategy(), 1..40)) {
        let mut storage = MemoryStorage::new();
        check_against_shadow(&mut storage, ops)?;
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn sled_log_matches_shadow(ops in proptest::collection::vec(log_op_strategy(), 1..25)) {
        let tmp = TempDir::new().expect("tempdir");
        let mut storage = SledStorage::open(tmp.path()).expect("open sled");
        check_against_shadow(&mut storage, ops)?;
    }
}
