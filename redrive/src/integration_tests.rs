//! End-to-end tests for redrive attempts.

#[cfg(test)]
mod tests {
    use crate::config::{DispatchParams, RedriveConfig, RunType};
    use crate::core::{Module, ReachId, RunContext, RunToken};
    use crate::errors::RedriveError;
    use crate::pipeline::RedrivePipeline;
    use crate::ports::{FsObjectStore, InMemoryObjectStore, InMemoryOrchestrator, ObjectStore, Orchestrator};
    use crate::retry::{JitterStrategy, RetryConfig};
    use crate::testing::{DatasetFixture, MapResultsFixture, TEST_EXECUTION_ARN, TEST_PREFIX};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    const JSON_BUCKET: &str = "confluence-test-json";
    const MAP_BUCKET: &str = "confluence-test-map-state";
    const MAP_RUN: &str = "arn:aws:states:us-west-2:123456789012:mapRun:confluence-test-workflow/sad:1";

    fn run(token: u32) -> RunContext {
        RunContext::with_parts(
            RunToken::from_value(token),
            Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap(),
        )
    }

    fn config() -> RedriveConfig {
        RedriveConfig::new("/mnt/data/input", TEST_PREFIX)
            .with_retry(
                RetryConfig::new()
                    .with_base_delay_ms(1)
                    .with_jitter(JitterStrategy::None),
            )
            .with_dispatch(DispatchParams::new("0007", RunType::Constrained, 5))
    }

    fn orchestrator() -> Arc<InMemoryOrchestrator> {
        Arc::new(InMemoryOrchestrator::new().with_map_run(MAP_RUN, TEST_EXECUTION_ARN))
    }

    fn pipeline(
        config: RedriveConfig,
        store: &Arc<InMemoryObjectStore>,
        orchestrator: &Arc<InMemoryOrchestrator>,
        datasets: &DatasetFixture,
    ) -> RedrivePipeline {
        RedrivePipeline::new(
            config,
            Arc::clone(store) as Arc<dyn ObjectStore>,
            Arc::clone(orchestrator) as Arc<dyn Orchestrator>,
        )
        .unwrap()
        .with_dataset_store(datasets.store())
    }

    fn ids(values: &[i64]) -> Vec<ReachId> {
        values.iter().copied().map(ReachId::from).collect()
    }

    #[tokio::test]
    async fn test_flat_failure_is_removed_and_workflow_restarted() {
        let store = MapResultsFixture::new(Arc::new(InMemoryObjectStore::new()), MAP_BUCKET)
            .failure(Module::Sad, &[1])
            .success(Module::Sad)
            .manifest(Module::Sad, MAP_RUN)
            .store();
        let orchestrator = orchestrator();
        let datasets = DatasetFixture::new().with_reaches(&[1, 2, 3]);

        let outcome = pipeline(config(), &store, &orchestrator, &datasets)
            .run_with(run(123_456))
            .await
            .unwrap();

        assert_eq!(outcome.reconciliation.subset.identifiers(), ids(&[1, 3]).as_slice());
        assert_eq!(
            store.object_json(JSON_BUCKET, "reaches_of_interest_123456.json").unwrap(),
            serde_json::json!([{"reach_id": 1}, {"reach_id": 3}])
        );
        assert_eq!(
            store
                .object_json(JSON_BUCKET, "20240506T070809_redrive_123456/failures.json")
                .unwrap(),
            serde_json::json!({
                "sad": {"json_file": "reaches.json", "indexes": [1], "reach_ids": [2]}
            })
        );

        let started = orchestrator.started();
        assert_eq!(started.len(), 1);
        assert_eq!(
            started[0].state_machine_arn,
            "arn:aws:states:us-west-2:123456789012:stateMachine:confluence-test-workflow"
        );
        assert_eq!(started[0].run_name, "confluence-test-workflow-123456");
        assert_eq!(started[0].input_json()["reach_subset_file"], "reaches_of_interest_123456.json");
        assert_eq!(started[0].input_json()["version"], "0007");

        assert!(store.keys(MAP_BUCKET).is_empty());
        assert_eq!(
            outcome.execution.as_ref().map(|e| e.as_str()),
            Some(TEST_EXECUTION_ARN)
        );
    }

    #[tokio::test]
    async fn test_basin_failure_removed_from_every_dataset_copy() {
        let store = MapResultsFixture::new(Arc::new(InMemoryObjectStore::new()), MAP_BUCKET)
            .failure(Module::Moi, &[0])
            .manifest(Module::Moi, MAP_RUN)
            .store();
        let orchestrator = orchestrator();
        let datasets = DatasetFixture::new()
            .with_basins(&[&[10, 11], &[12]])
            .with_reaches(&[10, 11, 12])
            .with_sets("hivdisets.json", &[&[10], &[11, 12]])
            .with_sets("metrosets.json", &[&[12]])
            .with_sets("neosets.json", &[&[11], &[12]])
            .with_sets("sicsets.json", &[&[10, 11]]);

        let outcome = pipeline(config().with_rewrite_datasets(true), &store, &orchestrator, &datasets)
            .run_with(run(200_000))
            .await
            .unwrap();

        assert_eq!(outcome.reconciliation.subset.identifiers(), ids(&[12]).as_slice());
        assert_eq!(outcome.reconciliation.rewritten.len(), 6);

        for key in &outcome.reconciliation.rewritten {
            let body = store.object(JSON_BUCKET, key).unwrap();
            let text = String::from_utf8(body).unwrap();
            assert!(!text.contains("10"), "{key} still holds 10");
            assert!(!text.contains("11"), "{key} still holds 11");
        }
        assert_eq!(orchestrator.started().len(), 1);
    }

    #[tokio::test]
    async fn test_ambiguous_execution_blocks_dispatch() {
        let other_run = "arn:aws:states:us-west-2:123456789012:mapRun:confluence-test-workflow/moi:2";
        let store = MapResultsFixture::new(Arc::new(InMemoryObjectStore::new()), MAP_BUCKET)
            .failure(Module::Sad, &[0])
            .manifest(Module::Sad, MAP_RUN)
            .manifest(Module::Moi, other_run)
            .store();
        let orchestrator = Arc::new(
            InMemoryOrchestrator::new()
                .with_map_run(MAP_RUN, TEST_EXECUTION_ARN)
                .with_map_run(
                    other_run,
                    "arn:aws:states:us-west-2:123456789012:execution:confluence-test-workflow:run-0",
                ),
        );
        let datasets = DatasetFixture::new().with_reaches(&[1, 2]);

        let err = pipeline(config(), &store, &orchestrator, &datasets)
            .run_with(run(300_000))
            .await
            .unwrap_err();

        assert!(matches!(err, RedriveError::AmbiguousExecution { ref arns, .. } if arns.len() == 2));
        assert!(orchestrator.started().is_empty());
        assert!(store
            .object(JSON_BUCKET, "20240506T070809_redrive_300000/failures.json")
            .is_some());
        assert!(!store.keys(MAP_BUCKET).is_empty());
    }

    #[tokio::test]
    async fn test_empty_working_set_never_dispatches() {
        let store = MapResultsFixture::new(Arc::new(InMemoryObjectStore::new()), MAP_BUCKET)
            .failure(Module::Input, &[0, 1])
            .manifest(Module::Input, MAP_RUN)
            .store();
        let orchestrator = orchestrator();
        let datasets = DatasetFixture::new().with_reaches(&[1, 2]);

        let err = pipeline(config(), &store, &orchestrator, &datasets)
            .run_with(run(400_000))
            .await
            .unwrap_err();

        assert!(matches!(err, RedriveError::EmptyWorkingSet { .. }));
        assert!(orchestrator.started().is_empty());
        assert_eq!(orchestrator.describe_calls(), 0);
        assert_eq!(
            store.keys(JSON_BUCKET),
            vec!["20240506T070809_redrive_400000/failures.json".to_string()]
        );
    }

    #[tokio::test]
    async fn test_report_only_skips_correlation_and_dispatch() {
        let store = MapResultsFixture::new(Arc::new(InMemoryObjectStore::new()), MAP_BUCKET)
            .failure(Module::Neobam, &[2])
            .manifest(Module::Neobam, MAP_RUN)
            .store();
        let orchestrator = orchestrator();
        let datasets = DatasetFixture::new().with_reaches(&[1, 2, 3]);

        let outcome = pipeline(config().with_report_only(true), &store, &orchestrator, &datasets)
            .run_with(run(500_000))
            .await
            .unwrap();

        assert!(outcome.execution.is_none());
        assert!(outcome.dispatched.is_none());
        assert_eq!(orchestrator.describe_calls(), 0);
        assert_eq!(store.keys(MAP_BUCKET).len(), 2);
        assert_eq!(outcome.reconciliation.subset.identifiers(), ids(&[1, 2]).as_slice());
    }

    #[tokio::test]
    async fn test_step_timings_cover_every_step_that_ran() {
        let store = MapResultsFixture::new(Arc::new(InMemoryObjectStore::new()), MAP_BUCKET)
            .failure(Module::Neobam, &[2])
            .manifest(Module::Neobam, MAP_RUN)
            .store();
        let orchestrator = orchestrator();
        let datasets = DatasetFixture::new().with_reaches(&[1, 2, 3]);

        let outcome = pipeline(config().with_report_only(true), &store, &orchestrator, &datasets)
            .run_with(run(500_001))
            .await
            .unwrap();

        let timings = &outcome.timings;
        let ran: Vec<f64> = ["locate", "resolve", "reconcile"]
            .iter()
            .map(|step| timings.get(step).unwrap())
            .collect();
        assert!(timings.get("correlate").is_none());
        assert!(timings.get("dispatch").is_none());
        assert!((timings.total_ms() - ran.iter().sum::<f64>()).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_transient_store_errors_are_retried() {
        let store = MapResultsFixture::new(Arc::new(InMemoryObjectStore::new()), MAP_BUCKET)
            .failure(Module::Sad, &[0])
            .manifest(Module::Sad, MAP_RUN)
            .store();
        store.fail_next(2);
        let orchestrator = orchestrator();
        let datasets = DatasetFixture::new().with_reaches(&[1, 2]);

        let outcome = pipeline(config(), &store, &orchestrator, &datasets)
            .run_with(run(600_000))
            .await
            .unwrap();

        assert_eq!(outcome.reconciliation.subset.identifiers(), ids(&[2]).as_slice());
        assert_eq!(orchestrator.started().len(), 1);
    }

    #[tokio::test]
    async fn test_refine_applies_new_failures_to_previous_subset() {
        let store = MapResultsFixture::new(Arc::new(InMemoryObjectStore::new()), MAP_BUCKET)
            .failure(Module::Sad, &[3])
            .manifest(Module::Sad, MAP_RUN)
            .store();
        store.insert_json(
            JSON_BUCKET,
            "reaches_of_interest_111111.json",
            &serde_json::json!([{"reach_id": 1}, {"reach_id": 3}, {"reach_id": 4}]),
        );
        let orchestrator = orchestrator();
        let datasets = DatasetFixture::new().with_reaches(&[1, 2, 3, 4]);

        let outcome = pipeline(
            config().with_existing_subset("reaches_of_interest_111111.json"),
            &store,
            &orchestrator,
            &datasets,
        )
        .run_with(run(700_000))
        .await
        .unwrap();

        assert_eq!(outcome.reconciliation.subset.identifiers(), ids(&[1, 3]).as_slice());
    }

    #[tokio::test]
    async fn test_expanded_run_reads_expanded_reaches() {
        let store = MapResultsFixture::new(Arc::new(InMemoryObjectStore::new()), MAP_BUCKET)
            .failure(Module::Input, &[0])
            .failure(Module::Momma, &[0])
            .manifest(Module::Input, MAP_RUN)
            .store();
        let orchestrator = orchestrator();
        let datasets = DatasetFixture::new()
            .with_reaches(&[1, 2, 3])
            .with_expanded_reaches(&[7, 8, 1]);

        let outcome = pipeline(config().with_expanded(true), &store, &orchestrator, &datasets)
            .run_with(run(800_000))
            .await
            .unwrap();

        // input index 0 is 7 in the expanded file, momma index 0 is 1 in reaches.json
        assert_eq!(outcome.reconciliation.subset.identifiers(), ids(&[8]).as_slice());
        assert_eq!(
            outcome.report.get(Module::Input).map(|f| f.json_file.as_str()),
            Some("expanded_reaches_of_interest.json")
        );
    }

    #[tokio::test]
    async fn test_filesystem_store_end_to_end() {
        let input = tempfile::tempdir().unwrap();
        std::fs::write(
            input.path().join("reaches.json"),
            r#"[{"reach_id": 1, "sword": "na"}, {"reach_id": 2, "sword": "na"}, {"reach_id": 3, "sword": "eu"}]"#,
        )
        .unwrap();
        std::fs::write(input.path().join("continent.json"), r#"[{"na": [7]}]"#).unwrap();

        let buckets = tempfile::tempdir().unwrap();
        let store = Arc::new(FsObjectStore::new(buckets.path()));
        store
            .put(
                MAP_BUCKET,
                "validation/run-1/FAILED_0.json",
                crate::testing::failure_marker(&[2]).to_string().into_bytes(),
                false,
            )
            .await
            .unwrap();

        let pipeline = RedrivePipeline::new(
            RedriveConfig::new(input.path(), TEST_PREFIX)
                .with_report_only(true)
                .with_rewrite_datasets(true),
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            Arc::new(InMemoryOrchestrator::new()),
        )
        .unwrap();

        let outcome = pipeline.run_with(run(900_000)).await.unwrap();

        assert_eq!(outcome.reconciliation.subset.identifiers(), ids(&[1, 2]).as_slice());
        let subset: serde_json::Value = serde_json::from_slice(
            &store
                .get(JSON_BUCKET, "reaches_of_interest_900000.json")
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(
            subset,
            serde_json::json!([{"reach_id": 1, "sword": "na"}, {"reach_id": 2, "sword": "na"}])
        );
        let reduced: serde_json::Value = serde_json::from_slice(
            &store
                .get(JSON_BUCKET, "20240506T070809_redrive_900000/reaches.json")
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(
            reduced,
            serde_json::json!([{"reach_id": 1, "sword": "na"}, {"reach_id": 2, "sword": "na"}])
        );
        assert!(store
            .get(JSON_BUCKET, "20240506T070809_redrive_900000/continent.json")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_same_failures_give_same_membership_across_attempts() {
        let datasets = DatasetFixture::new().with_reaches(&[5, 6, 7, 8]);
        let mut subsets = Vec::new();
        let mut fingerprints = Vec::new();

        for token in [910_001, 910_002] {
            let store = MapResultsFixture::new(Arc::new(InMemoryObjectStore::new()), MAP_BUCKET)
                .failure(Module::Offline, &[1, 3])
                .store();
            let outcome = pipeline(config().with_report_only(true), &store, &orchestrator(), &datasets)
                .run_with(run(token))
                .await
                .unwrap();
            subsets.push(outcome.reconciliation.subset.identifiers().to_vec());
            fingerprints.push(outcome.reconciliation.fingerprint.clone());
        }

        assert_eq!(subsets[0], subsets[1]);
        assert_eq!(subsets[0], ids(&[5, 7]));
        assert_eq!(fingerprints[0], fingerprints[1]);
    }
}
