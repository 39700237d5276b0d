//! Integration tests for flurry

mod config_tests {
    use flurry::HostConfig;
    use flurry::config::{ConfigPath, FunctionKey, TriggerConfig};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_config_dir_merges_functions() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("00-host.yaml"),
            r#"
storage:
  url: "memory://"
polling:
  interval_secs: 5
worker:
  command: node
  args: ["worker.js"]
"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("10-functions.yml"),
            r#"
functions:
  thumbnail:
    trigger: { type: blob, path: "images/{name}.png" }
    outputs: ["thumbs/{name}.png"]
  orders:
    trigger: { type: queue, queue: orders }
"#,
        )
        .unwrap();
        fs::write(dir.path().join("README.md"), "not config").unwrap();

        let config = HostConfig::from_paths(&[ConfigPath::Dir(dir.path().to_path_buf())]).unwrap();

        assert_eq!(config.storage.url, "memory://");
        assert_eq!(config.polling.interval_secs, 5);
        assert_eq!(config.worker.as_ref().unwrap().args, vec!["worker.js"]);
        let keys: Vec<_> = config.functions.keys().map(|k| k.id().to_string()).collect();
        assert_eq!(keys, vec!["thumbnail", "orders"]);
        assert!(matches!(
            &config.functions[&FunctionKey::from("thumbnail")].trigger,
            TriggerConfig::Blob { path } if path == "images/{name}.png"
        ));
    }

    #[test]
    fn test_duplicate_function_across_files_is_rejected() {
        let dir = TempDir::new().unwrap();
        let function = r#"
worker: { command: node }
functions:
  orders:
    trigger: { type: queue, queue: orders }
"#;
        fs::write(dir.path().join("a.yaml"), function).unwrap();
        fs::write(dir.path().join("b.yaml"), function).unwrap();

        let err = HostConfig::from_paths(&[ConfigPath::Dir(dir.path().to_path_buf())]).unwrap_err();
        assert!(err.to_string().contains("orders"), "{err}");
    }

    #[test]
    fn test_output_with_unbound_parameter_is_rejected() {
        let err = HostConfig::parse(
            r#"
worker: { command: node }
functions:
  convert:
    trigger: { type: blob, path: "input/{name}.csv" }
    outputs: ["output/{other}.json"]
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("other"), "{err}");
    }
}

mod host_tests {
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::Arc;
    use std::time::Duration;

    use flurry::blob::BlobListener;
    use flurry::host::{
        FunctionRegistry, HostContext, InstanceStatus, SchedulerOptions, TriggerScheduler,
        WorkerInvoker,
    };
    use flurry::rpc::message::{InvocationInput, InvocationRequest, InvocationResponse};
    use flurry::rpc::{FunctionWorker, OutputBinding, WorkerChannel, memory_pair, serve};
    use flurry::{BlobPath, HostConfig, StorageProvider};
    use flurry_core::{BlobStore, PollingProcessor, QueueStore, StoreQueue};

    /// Upper-cases CSV input into JSON output and reports each run on a queue.
    struct Shouter;

    #[async_trait]
    impl FunctionWorker for Shouter {
        async fn invoke(&self, request: InvocationRequest) -> Result<InvocationResponse, String> {
            let InvocationInput::Blob { path, content } = &request.input else {
                return Err("expected a blob".to_string());
            };
            let name = request
                .trigger_metadata
                .get("name")
                .ok_or("missing name binding")?;
            Ok(InvocationResponse {
                invocation_id: request.invocation_id,
                outputs: vec![
                    OutputBinding::Blob {
                        path: BlobPath::new("output", format!("{name}.json")),
                        content: content.to_uppercase(),
                    },
                    OutputBinding::Queue {
                        queue: "done".to_string(),
                        message: path.to_string(),
                    },
                ],
                return_value: None,
            })
        }
    }

    const CONFIG: &str = r#"
storage:
  url: "memory://"
  activity_log: false
worker:
  command: in-process
functions:
  shout:
    trigger: { type: blob, path: "input/{name}.csv" }
    outputs: ["output/{name}.json"]
"#;

    async fn tick(scheduler: &mut TriggerScheduler) -> usize {
        match scheduler.prepare(false).await.unwrap() {
            Some(pending) => {
                let count = pending.len();
                scheduler.process(pending).await.unwrap();
                count
            }
            None => 0,
        }
    }

    /// Tick until something ran and the startup scans are done.
    async fn run_until_busy(scheduler: &mut TriggerScheduler) -> usize {
        let mut ran = 0;
        for _ in 0..100 {
            ran += tick(scheduler).await;
            if ran > 0 && !scheduler.blob_listener().is_scanning() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        ran
    }

    async fn start_host(
        config: &HostConfig,
        storage: Arc<StorageProvider>,
    ) -> (TriggerScheduler, Arc<HostContext>, Arc<StoreQueue>) {
        let (channel, endpoint) = memory_pair("shouter");
        serve(endpoint, Arc::new(Shouter));
        let mut registry = FunctionRegistry::from_config(config).unwrap();
        let invoker = WorkerInvoker::connect(
            Arc::new(WorkerChannel::new(channel)),
            config.worker.as_ref().unwrap(),
            &mut registry,
        )
        .await
        .unwrap();

        let queues = Arc::new(StoreQueue::new(storage.clone()));
        let blobs = BlobListener::new(storage.clone(), registry.containers())
            .with_rescan_interval(config.polling.rescan_interval());
        let context = Arc::new(HostContext::new("integration"));
        let scheduler = TriggerScheduler::new(
            context.clone(),
            registry,
            blobs,
            storage.clone(),
            queues.clone(),
            Arc::new(invoker),
            SchedulerOptions::default(),
        );
        context.mark_ready();
        (scheduler, context, queues)
    }

    #[tokio::test]
    async fn test_host_tick_runs_blob_function_end_to_end() {
        let config = HostConfig::parse(CONFIG).unwrap();
        let storage = Arc::new(StorageProvider::in_memory());
        storage
            .write_blob(&BlobPath::new("input", "hello.csv"), Bytes::from("a,b\n"))
            .await
            .unwrap();
        let (mut scheduler, context, queues) = start_host(&config, storage.clone()).await;

        assert_eq!(run_until_busy(&mut scheduler).await, 1);

        let output = storage
            .read_blob(&BlobPath::new("output", "hello.json"))
            .await
            .unwrap();
        assert_eq!(output, Bytes::from("A,B\n"));

        let done = queues
            .get_message("done", Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.content, "input/hello.csv");

        let entry = scheduler.instances().iter().next().unwrap();
        assert_eq!(entry.status, InstanceStatus::Succeeded);
        assert_eq!(entry.function, "shout");
        assert!(entry.started_at.is_some() && entry.ended_at.is_some());

        // The output is already newer than the input, so a second delivery is suppressed.
        scheduler
            .blob_listener()
            .notify(BlobPath::new("input", "hello.csv"));
        assert_eq!(tick(&mut scheduler).await, 0);

        scheduler.shutdown().await;
        context.stop();
        assert!(!context.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_blob_written_after_startup_is_found_by_rescan() {
        let config = HostConfig::parse(CONFIG).unwrap();
        assert!(config.polling.rescan_interval().is_some());
        let storage = Arc::new(StorageProvider::in_memory());
        let (mut scheduler, _context, _queues) = start_host(&config, storage.clone()).await;

        for _ in 0..10 {
            assert_eq!(tick(&mut scheduler).await, 0);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!scheduler.blob_listener().is_scanning());

        storage
            .write_blob(&BlobPath::new("input", "late.csv"), Bytes::from("x\n"))
            .await
            .unwrap();
        tokio::time::advance(config.polling.rescan_interval().unwrap()).await;

        assert_eq!(run_until_busy(&mut scheduler).await, 1);
        let output = storage
            .read_blob(&BlobPath::new("output", "late.json"))
            .await
            .unwrap();
        assert_eq!(output, Bytes::from("X\n"));
        scheduler.shutdown().await;
    }
}
