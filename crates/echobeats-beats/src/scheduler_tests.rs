    use super::*;
    use echobeats_scheduler::{JobStatus, JobType, MemoryJobStore};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    fn beats() -> EchobeatsScheduler {
        let scheduler = Scheduler::new(SchedulerConfig::default(), Arc::new(MemoryJobStore::new()));
        EchobeatsScheduler::new(Arc::new(scheduler))
    }

    struct RecordingLoop {
        beats: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl CognitiveLoop for RecordingLoop {
        async fn on_beat(
            &self,
            kind: BeatKind,
            _ctx: &ExecutionContext,
            job: &ScheduledJob,
        ) -> Result<(), ExecutionError> {
            assert_eq!(job.context, kind.context());
            self.beats.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ExecutionError::failed("loop unavailable"))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_registers_every_beat() {
        let beats = beats();
        let contexts = beats.executors().contexts();
        assert_eq!(contexts.len(), 5);
        for kind in BeatKind::ALL {
            assert!(beats.executors().contains(kind.context()));
        }
    }

    #[tokio::test]
    async fn test_schedule_cognitive_beat() {
        let beats = beats();
        let before = Utc::now();

        let id = beats.schedule_cognitive_beat(Duration::from_secs(30)).await.unwrap();
        let job = beats.get_job(&id).await.unwrap();

        assert_eq!(job.name, "Cognitive Beat");
        assert_eq!(job.job_type, JobType::Interval);
        assert_eq!(job.context, "cognitive_beat");
        assert_eq!(job.priority, 10);
        assert_eq!(job.payload["beat_type"], "standard");
        assert!(job.next_run_at >= before + chrono::Duration::seconds(30));
    }

    #[tokio::test]
    async fn test_each_constructor_uses_its_kind() {
        let beats = beats();
        let interval = Duration::from_secs(120);

        let ids = vec![
            beats.schedule_knowledge_integration(interval).await.unwrap(),
            beats.schedule_wisdom_cultivation(interval).await.unwrap(),
            beats.schedule_dream_processing(interval).await.unwrap(),
            beats.schedule_interest_update(interval).await.unwrap(),
        ];

        let mut priorities = Vec::new();
        for id in &ids {
            priorities.push(beats.get_job(id).await.unwrap().priority);
        }
        assert_eq!(priorities, vec![5, 3, 2, 4]);
    }

    #[tokio::test]
    async fn test_huge_interval_saturates_first_run() {
        let beats = beats();
        let id = beats
            .schedule_dream_processing(Duration::from_secs(u64::MAX))
            .await
            .unwrap();

        let job = beats.get_job(&id).await.unwrap();
        assert_eq!(job.next_run_at, chrono::DateTime::<Utc>::MAX_UTC);
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let beats = beats();
        assert!(matches!(
            beats.schedule_dream_processing(Duration::ZERO).await,
            Err(SchedulerError::InvalidJob(_))
        ));
    }

    #[tokio::test]
    async fn test_configured_beats_skip_existing() {
        let beats = beats();
        beats.schedule_cognitive_beat(Duration::from_secs(10)).await.unwrap();

        let mut config = BeatsConfig::default();
        config.dream_processing.enabled = false;

        let scheduled = beats.schedule_configured_beats(&config).await.unwrap();
        assert_eq!(scheduled.len(), 3);
        assert_eq!(beats.get_all_jobs().len(), 4);

        let again = beats.schedule_configured_beats(&config).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_beat_forwards_to_cognitive_loop() {
        let beats = beats();
        let job = ScheduledJob::one_off("beat").with_context(BeatKind::CognitiveBeat.context());
        let ctx = ExecutionContext::new(Duration::from_secs(5), 1);
        let executor = beats.executors().resolve(&job.context);

        assert!(executor.execute(&ctx, &job).await.is_ok());

        let cognitive_loop = Arc::new(RecordingLoop {
            beats: AtomicU32::new(0),
            fail: true,
        });
        beats.set_cognitive_loop(cognitive_loop.clone());

        let err = executor.execute(&ctx, &job).await.unwrap_err();
        assert_eq!(err.to_string(), "loop unavailable");
        assert_eq!(cognitive_loop.beats.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_open_persists_beats() {
        let temp_dir = TempDir::new().unwrap();
        let config = SchedulerConfig {
            store_path: temp_dir.path().to_path_buf(),
            ..Default::default()
        };

        let id = {
            let beats = EchobeatsScheduler::open(config.clone()).await.unwrap();
            beats.schedule_interest_update(Duration::from_secs(60)).await.unwrap()
        };

        let beats = EchobeatsScheduler::open(config).await.unwrap();
        let report = beats.recover_jobs().await.unwrap();
        assert_eq!(report.recovered, 1);

        let job = beats.get_job(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.payload["update_type"], "decay_and_reinforce");

        let scheduled = beats.schedule_configured_beats(&BeatsConfig::default()).await.unwrap();
        assert_eq!(scheduled.len(), 4);
    }
