//! # Sequential Equivalence
//!
//! For any batch, committing through the OCC engine must leave the parent store
//! exactly where running the batch one transaction at a time, in index order,
//! leaves it, and every output must match its sequential counterpart.

#[cfg(test)]
mod tests {
    use crate::fixtures::{init_tracing, key, run_reference, seeded_store, Op, Script, ScriptExecutor};
    use proptest::prelude::*;
    use qc_18_parallel_execution::{
        Key, OccConfig, ParallelExecutionApi, ParallelExecutionService, Value,
    };
    use std::collections::BTreeMap;

    // =============================================================================
    // STRATEGIES
    // =============================================================================

    /// Small key space so transactions actually collide.
    const KEY_SPACE: u8 = 12;

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => (0..KEY_SPACE).prop_map(Op::Read),
            4 => (0..KEY_SPACE, 0u64..100).prop_map(|(k, d)| Op::Write(k, d)),
            1 => (0..KEY_SPACE).prop_map(Op::Delete),
            2 => (0..KEY_SPACE, 0..KEY_SPACE, any::<bool>(), proptest::option::of(1usize..4)).prop_map(
                |(a, b, descending, limit)| Op::Scan {
                    start: a.min(b),
                    end: a.max(b) + 1,
                    descending,
                    limit,
                }
            ),
        ]
    }

    fn batch_strategy() -> impl Strategy<Value = Vec<Script>> {
        prop::collection::vec(
            prop::collection::vec(op_strategy(), 1..6).prop_map(Script::new),
            1..24,
        )
    }

    /// Scripts that observe the same key or range twice around their writes.
    fn repeat_read_strategy() -> impl Strategy<Value = Script> {
        (0..KEY_SPACE, 0..KEY_SPACE, 0u64..100, 0..KEY_SPACE, any::<bool>(), proptest::option::of(1usize..4))
            .prop_map(|(read, write, delta, bound, descending, limit)| {
                let scan = Op::Scan {
                    start: bound / 2,
                    end: bound + 1,
                    descending,
                    limit,
                };
                Script::new(vec![
                    Op::Read(read),
                    scan.clone(),
                    Op::Write(write, delta),
                    Op::Read(read),
                    scan,
                ])
            })
    }

    fn repeat_read_batch_strategy() -> impl Strategy<Value = Vec<Script>> {
        prop::collection::vec(
            prop_oneof![
                1 => prop::collection::vec(op_strategy(), 1..4).prop_map(Script::new),
                2 => repeat_read_strategy(),
            ],
            8..32,
        )
    }

    fn parent_strategy() -> impl Strategy<Value = Vec<(u8, u64)>> {
        prop::collection::vec((0..KEY_SPACE, 0u64..1000), 0..8)
    }

    fn service(workers: usize, max_rounds: u32) -> ParallelExecutionService<ScriptExecutor> {
        let config = OccConfig {
            worker_count: workers,
            max_rounds,
            parallel_threshold: 2,
            ..OccConfig::default()
        };
        ParallelExecutionService::with_config(ScriptExecutor, config).unwrap()
    }

    fn check_equivalence(
        service: &ParallelExecutionService<ScriptExecutor>,
        seed: &[(u8, u64)],
        batch: &[Script],
    ) -> (Vec<u64>, Vec<u64>) {
        let mut parent = seeded_store(seed);
        let mut expected: BTreeMap<Key, Value> = parent.entries().clone();
        let expected_outputs = run_reference(&mut expected, batch);

        let outcome = service.execute_block(&mut parent, batch).unwrap();

        assert_eq!(parent.entries(), &expected);
        (outcome.results, expected_outputs)
    }

    // =============================================================================
    // PROPERTIES
    // =============================================================================

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn test_parallel_matches_sequential(seed in parent_strategy(), batch in batch_strategy()) {
            let (actual, expected) = check_equivalence(&service(4, 10), &seed, &batch);
            prop_assert_eq!(actual, expected);
        }

        #[test]
        fn test_repeated_reads_match_sequential(
            seed in parent_strategy(),
            batch in repeat_read_batch_strategy(),
        ) {
            let (actual, expected) = check_equivalence(&service(8, 10), &seed, &batch);
            prop_assert_eq!(actual, expected);
        }

        #[test]
        fn test_fallback_matches_sequential(seed in parent_strategy(), batch in batch_strategy()) {
            // One round forces most contended batches through the fallback.
            let (actual, expected) = check_equivalence(&service(4, 1), &seed, &batch);
            prop_assert_eq!(actual, expected);
        }
    }

    // =============================================================================
    // FIXED BATCHES
    // =============================================================================

    #[test]
    fn test_read_your_writes_chain() {
        init_tracing();
        let seed = [(0u8, 1u64)];
        let batch: Vec<Script> = (0..16u8)
            .map(|i| Script::new(vec![Op::Read(i), Op::Write(i + 1, 1)]))
            .collect();

        let (actual, expected) = check_equivalence(&service(4, 10), &seed, &batch);
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_scan_heavy_batch() {
        let seed: Vec<(u8, u64)> = (0..KEY_SPACE).map(|k| (k, u64::from(k))).collect();
        let batch: Vec<Script> = (0..20u8)
            .map(|i| {
                let k = i % KEY_SPACE;
                Script::new(vec![
                    Op::Scan { start: 0, end: KEY_SPACE, descending: i % 2 == 0, limit: None },
                    if i % 3 == 0 { Op::Delete(k) } else { Op::Write(k, 3) },
                ])
            })
            .collect();

        let (actual, expected) = check_equivalence(&service(4, 10), &seed, &batch);
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_repeated_reads_under_contention() {
        let seed = [(1u8, 5u64), (3, 7)];
        let batch: Vec<Script> = (0..32u8)
            .map(|i| {
                let k = i % 4;
                Script::new(vec![
                    Op::Read(k),
                    Op::Scan { start: 0, end: 6, descending: i % 2 == 1, limit: Some(3) },
                    Op::Write((k + 1) % 4, u64::from(i)),
                    Op::Read(k),
                    Op::Scan { start: 0, end: 6, descending: i % 2 == 1, limit: Some(3) },
                ])
            })
            .collect();
        let svc = service(8, 10);

        for _ in 0..10 {
            let (actual, expected) = check_equivalence(&svc, &seed, &batch);
            assert_eq!(actual, expected);
        }
    }

    #[test]
    fn test_deterministic_across_runs() {
        let seed = [(1u8, 10u64), (2, 20)];
        let batch: Vec<Script> = (0..12u8)
            .map(|i| Script::new(vec![Op::Read(i % 3), Op::Write((i + 1) % 3, u64::from(i))]))
            .collect();
        let svc = service(4, 10);

        let mut first = seeded_store(&seed);
        let mut second = seeded_store(&seed);
        let a = svc.execute_block(&mut first, &batch).unwrap();
        let b = svc.execute_block(&mut second, &batch).unwrap();

        assert_eq!(first, second);
        assert_eq!(a.results, b.results);
        assert!(first.entries().contains_key(&key(0)));
    }
}
