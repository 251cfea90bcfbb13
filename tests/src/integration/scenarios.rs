//! # Batch Scenarios
//!
//! Ledger-style batches with known outcomes, termination under heavy
//! contention, cancellation and re-execution determinism.

#[cfg(test)]
mod tests {
    use crate::fixtures::{decode, encode, init_tracing, key, seeded_store, Op, Script, ScriptExecutor};
    use parking_lot::Mutex;
    use qc_18_parallel_execution::{
        metrics, CancellationToken, ExecutionAbort, MemoryStore, MultiVersionStore, OccConfig,
        OccError, ParallelExecutionApi, ParallelExecutionService, ParentStore, StoreLimits,
        TransactionExecutor, VersionIndexedStore,
    };
    use std::time::Duration;

    // =============================================================================
    // LEDGER FIXTURE
    // =============================================================================

    #[derive(Clone, Debug)]
    enum Payment {
        /// Move `amount` from one account to another, pausing after the debit read
        Transfer { from: &'static str, to: &'static str, amount: u64, pause: Duration },
        /// Debit `amount` if the balance covers `required`
        Debit { account: &'static str, required: u64, amount: u64 },
    }

    #[derive(Debug, PartialEq)]
    enum Receipt {
        Applied,
        Rejected,
    }

    struct Bank {
        /// Balance of `A` seen by every execution of index 1, in order
        observed: Mutex<Vec<u64>>,
    }

    fn balance(store: &mut VersionIndexedStore<'_>, account: &str) -> Result<u64, ExecutionAbort> {
        Ok(store.get(account.as_bytes())?.map_or(0, |v| decode(&v)))
    }

    impl TransactionExecutor for Bank {
        type Transaction = Payment;
        type Output = Receipt;

        fn execute(
            &self,
            store: &mut VersionIndexedStore<'_>,
            payment: &Payment,
        ) -> Result<Receipt, ExecutionAbort> {
            match payment {
                Payment::Transfer { from, to, amount, pause } => {
                    let source = balance(store, from)?;
                    std::thread::sleep(*pause);
                    if source < *amount {
                        return Ok(Receipt::Rejected);
                    }
                    store.set(from.as_bytes().to_vec(), encode(source - amount))?;
                    let target = balance(store, to)?;
                    store.set(to.as_bytes().to_vec(), encode(target + amount))?;
                }
                Payment::Debit { account, required, amount } => {
                    let current = balance(store, account)?;
                    if store.index() == 1 {
                        self.observed.lock().push(current);
                    }
                    if current < *required {
                        return Ok(Receipt::Rejected);
                    }
                    store.set(account.as_bytes().to_vec(), encode(current - amount))?;
                }
            }
            Ok(Receipt::Applied)
        }
    }

    fn accounts(entries: &[(&str, u64)]) -> MemoryStore {
        MemoryStore::from_entries(entries.iter().map(|(k, v)| (k.as_bytes().to_vec(), encode(*v))))
    }

    fn account(store: &MemoryStore, name: &str) -> u64 {
        store.get(name.as_bytes()).unwrap().map_or(0, |v| decode(&v))
    }

    fn parallel_config() -> OccConfig {
        OccConfig {
            worker_count: 4,
            parallel_threshold: 2,
            ..OccConfig::default()
        }
    }

    // =============================================================================
    // LEDGER SCENARIOS
    // =============================================================================

    /// Index 1 reads A while index 0 is still running, so it starts from the
    /// stale A=100. Validation must catch it and re-run it against A=90.
    #[test]
    fn test_stale_debit_scenario() {
        init_tracing();
        let bank = Bank { observed: Mutex::new(Vec::new()) };
        let service = ParallelExecutionService::with_config(bank, parallel_config()).unwrap();
        let mut parent = accounts(&[("A", 100), ("B", 0)]);

        let batch = vec![
            Payment::Transfer { from: "A", to: "B", amount: 10, pause: Duration::from_millis(50) },
            Payment::Debit { account: "A", required: 10, amount: 5 },
        ];
        let outcome = service.execute_block(&mut parent, &batch).unwrap();

        assert_eq!(account(&parent, "A"), 85);
        assert_eq!(account(&parent, "B"), 10);
        assert_eq!(outcome.results, vec![Receipt::Applied, Receipt::Applied]);

        // Whatever the interleaving, the execution that was kept saw A=90.
        let observed = service.executor().observed.lock().clone();
        assert_eq!(observed.last(), Some(&90));
        if observed.first() == Some(&100) {
            assert!(outcome.metrics.retries >= 1);
            assert!(outcome.metrics.validation_failures >= 1);
        }
    }

    #[test]
    fn test_overdraft_is_rejected_not_fatal() {
        let bank = Bank { observed: Mutex::new(Vec::new()) };
        let service = ParallelExecutionService::with_config(bank, parallel_config()).unwrap();
        let mut parent = accounts(&[("A", 12)]);

        let batch = vec![
            Payment::Debit { account: "A", required: 10, amount: 10 },
            Payment::Debit { account: "A", required: 10, amount: 10 },
            Payment::Debit { account: "A", required: 1, amount: 1 },
        ];
        let outcome = service.execute_block(&mut parent, &batch).unwrap();

        assert_eq!(
            outcome.results,
            vec![Receipt::Applied, Receipt::Rejected, Receipt::Applied]
        );
        assert_eq!(account(&parent, "A"), 1);
    }

    // =============================================================================
    // TERMINATION
    // =============================================================================

    #[test]
    fn test_hot_key_terminates_with_round_cap() {
        let config = OccConfig {
            max_rounds: 2,
            ..parallel_config()
        };
        let service = ParallelExecutionService::with_config(ScriptExecutor, config).unwrap();
        let mut parent = seeded_store(&[(0, 0)]);

        // every transaction increments k0
        let batch: Vec<Script> = (0..64)
            .map(|_| Script::new(vec![Op::Read(0), Op::Write(0, 1)]))
            .collect();
        let outcome = service.execute_block(&mut parent, &batch).unwrap();

        assert_eq!(decode(&parent.entries()[&key(0)]), 64);
        assert!(outcome.metrics.rounds <= 2);
        assert_eq!(outcome.results.len(), 64);
    }

    #[test]
    fn test_single_worker_is_plain_sequential() {
        let service =
            ParallelExecutionService::with_config(ScriptExecutor, OccConfig::sequential()).unwrap();
        let mut parent = seeded_store(&[(0, 0)]);
        let batch: Vec<Script> = (0..8)
            .map(|_| Script::new(vec![Op::Read(0), Op::Write(0, 1)]))
            .collect();

        let outcome = service.execute_block(&mut parent, &batch).unwrap();

        assert_eq!(decode(&parent.entries()[&key(0)]), 8);
        assert_eq!(outcome.metrics.executions, 8);
        assert_eq!(outcome.metrics.sequential_executions, 8);
        assert!(!outcome.metrics.sequential_fallback);
    }

    // =============================================================================
    // CANCELLATION
    // =============================================================================

    #[test]
    fn test_cancel_mid_batch_leaves_parent_untouched() {
        let service =
            ParallelExecutionService::with_config(ScriptExecutor, parallel_config()).unwrap();
        let token = service.cancellation_token();
        let mut parent = seeded_store(&[(0, 5)]);
        let before = parent.clone();

        let mut batch: Vec<Script> = (0..16u8)
            .map(|i| Script::new(vec![Op::Read(0), Op::Write(i, 1)]))
            .collect();
        batch[3].cancel = Some(token.clone());

        let err = service.execute_block(&mut parent, &batch).unwrap_err();

        assert!(matches!(err, OccError::Cancelled));
        assert_eq!(parent, before);
        assert!(service.last_metrics().is_none());
    }

    #[test]
    fn test_shared_token_cancels_future_batches() {
        let token = CancellationToken::new();
        let config = parallel_config();
        let scheduler = qc_18_parallel_execution::Scheduler::new(ScriptExecutor, config)
            .unwrap()
            .with_cancellation(token.clone());
        token.cancel();

        let mut parent = seeded_store(&[]);
        let batch = vec![Script::new(vec![Op::Write(1, 1)])];
        assert!(matches!(
            scheduler.execute_batch(&mut parent, &batch),
            Err(OccError::Cancelled)
        ));
        assert!(parent.is_empty());
    }

    // =============================================================================
    // RE-EXECUTION
    // =============================================================================

    #[test]
    fn test_same_incarnation_same_writeset() {
        let parent = seeded_store(&[(1, 10), (2, 20), (3, 30)]);
        let mvs = MultiVersionStore::new();
        let limits = StoreLimits::parallel(&OccConfig::default());
        let script = Script::new(vec![
            Op::Read(1),
            Op::Scan { start: 0, end: 9, descending: true, limit: Some(2) },
            Op::Write(4, 1),
            Op::Delete(2),
        ]);

        let run = || {
            let mut store = VersionIndexedStore::new(5, 2, &mvs, &parent, limits);
            let output = ScriptExecutor.execute(&mut store, &script).unwrap();
            (output, store.writeset().clone(), store.readset().clone())
        };

        assert_eq!(run(), run());
    }

    // =============================================================================
    // METRICS
    // =============================================================================

    #[test]
    fn test_committed_batches_reach_prometheus() {
        let service =
            ParallelExecutionService::with_config(ScriptExecutor, parallel_config()).unwrap();
        let mut parent = seeded_store(&[]);
        let batch: Vec<Script> = (0..4u8).map(|i| Script::new(vec![Op::Write(i, 1)])).collect();

        service.execute_block(&mut parent, &batch).unwrap();

        let text = metrics::gather_metrics().unwrap();
        assert!(text.contains("qc_occ_batches_total"));
        assert_eq!(service.last_metrics().unwrap().keys_written, 4);
    }
}
