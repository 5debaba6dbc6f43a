mod common;

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::json;
use tokio::io::{AsyncWriteExt, duplex, split};

use devseed_core::{Record, SnapshotLayout, write_bytes_atomic};
use devseed_transfer::worker::{BLOCK_SIZE, FrameReader, write_frame};
use devseed_transfer::{
    Backend, Config, ExportOptions, ExportRequest, MemoryBackend, Result, StrategyConfig,
    StrategyKind, StrategyRegistry, TransferReport, WorkerClient, serve,
};

use common::{cleanup, config, name, photofeed_catalog, row, temp_root, transfer};

const PHOTOFEED: &str = r#"
    [entities]
    "auth.users" = [{ name = "internal", kind = "exact", primary_keys = [101, 102] }]
    "photos.photo" = [{ name = "all", kind = "all" }]
    "turtles.turtle" = [{ name = "all", kind = "all" }]
"#;

#[tokio::test]
async fn worker_answers_requests_against_the_parent_snapshot() {
    let root = temp_root("worker_serve");
    let config = config(PHOTOFEED);
    let registry = StrategyRegistry::new();
    let catalog = photofeed_catalog();
    let backend = MemoryBackend::new(catalog.clone())
        .with_rows(
            &name("auth.users"),
            vec![
                row(json!({"id": 101})),
                row(json!({"id": 102})),
                row(json!({"id": 103})),
            ],
        )
        .with_rows(
            &name("photos.photo"),
            vec![
                row(json!({"id": 1, "owner_id": 101, "parent_id": null})),
                row(json!({"id": 2, "owner_id": 103, "parent_id": null})),
            ],
        );
    let transfer = transfer(&config, &registry);
    let mut handler = transfer.worker(&backend, &catalog).expect("worker");

    let (parent, child) = duplex(256);
    let (child_read, child_write) = split(child);
    let (parent_read, mut parent_write) = split(parent);
    let layout = SnapshotLayout::new(&root);

    let server = serve(child_read, child_write, &mut handler);
    let client = async {
        let mut responses = FrameReader::new(parent_read);
        let mut decoded = Vec::new();
        for (entity, strategy) in [("auth.users", "internal"), ("photos.photo", "all")] {
            let request = ExportRequest {
                entity: name(entity),
                strategy: strategy.to_string(),
                destination: root.clone(),
            };
            write_frame(&mut parent_write, &request.encode().expect("encode"))
                .await
                .expect("send");
            let body = responses
                .read_frame(usize::MAX)
                .await
                .expect("read")
                .expect("response");
            write_bytes_atomic(&layout.strategy_file(&name(entity), strategy), &body)
                .expect("place file");
            let records: Vec<Record> = serde_json::from_slice(&body).expect("records");
            decoded.push(records);
        }
        parent_write.shutdown().await.expect("close");
        decoded
    };

    let (served, decoded) = tokio::join!(server, client);
    assert_eq!(served.expect("serve"), 2);

    let users: Vec<_> = decoded[0].iter().map(|r| r.primary_key.clone()).collect();
    assert_eq!(users, vec![json!(101), json!(102)]);
    let photos: Vec<_> = decoded[1].iter().map(|r| r.primary_key.clone()).collect();
    assert_eq!(photos, vec![json!(1)], "the worker saw the users file the parent wrote");
    cleanup(&root);
}

fn photofeed_backend() -> MemoryBackend {
    MemoryBackend::new(photofeed_catalog())
        .with_rows(
            &name("auth.users"),
            vec![
                row(json!({"id": 101, "username": "alice"})),
                row(json!({"id": 102, "username": "bob"})),
                row(json!({"id": 103, "username": "carol"})),
            ],
        )
        .with_rows(
            &name("photos.photo"),
            vec![
                row(json!({"id": 1, "owner_id": 101, "parent_id": null})),
                row(json!({"id": 2, "owner_id": 102, "parent_id": 1})),
                row(json!({"id": 3, "owner_id": 103, "parent_id": null})),
            ],
        )
        .with_rows(
            &name("turtles.turtle"),
            vec![
                row(json!({"id": 1, "standing_on_id": null})),
                row(json!({"id": 2, "standing_on_id": 1})),
            ],
        )
}

/// Export with the strategies served by an in-process worker over duplex pipes.
async fn export_via_worker(
    config: &Config,
    backend: &MemoryBackend,
    root: &Path,
    options: &ExportOptions,
) -> (Result<TransferReport>, Result<usize>) {
    let registry = StrategyRegistry::new();
    let transfer = transfer(config, &registry);
    let catalog = backend.catalog().await.expect("catalog");
    let mut handler = transfer.worker(backend, &catalog).expect("worker");

    let (requests, worker_input) = duplex(1024);
    let (worker_output, responses) = duplex(BLOCK_SIZE);
    let mut client = WorkerClient::connect(requests, responses);

    let parent = async {
        let report = transfer.export(backend, root, options, Some(&mut client)).await;
        client.finish().await.expect("finish");
        report
    };
    let served = serve(worker_input, worker_output, &mut handler);
    tokio::join!(parent, served)
}

fn strategy_files(root: &Path) -> BTreeMap<String, String> {
    let layout = SnapshotLayout::new(root);
    let mut files = BTreeMap::new();
    for entity in layout.entities().expect("entities") {
        let dir = layout.entity_dir(&entity);
        for file in std::fs::read_dir(&dir).expect("entity dir") {
            let path = file.expect("entry").path();
            let file_name = path.file_name().expect("file name").to_string_lossy();
            files.insert(
                format!("{entity}/{file_name}"),
                std::fs::read_to_string(&path).expect("strategy file"),
            );
        }
    }
    files
}

#[tokio::test]
async fn worker_export_writes_the_same_files_as_in_process_export() {
    let config = config(PHOTOFEED);
    let registry = StrategyRegistry::new();
    let backend = photofeed_backend();

    let local_root = temp_root("worker_e2e_local");
    transfer(&config, &registry)
        .export(&backend, &local_root, &ExportOptions::default(), None)
        .await
        .expect("in-process export");

    let worker_root = temp_root("worker_e2e_worker");
    let (report, served) =
        export_via_worker(&config, &backend, &worker_root, &ExportOptions::default()).await;
    let report = report.expect("worker export");
    assert_eq!(served.expect("serve"), 3);
    assert_eq!(report.strategies.len(), 3);
    assert!(report.strategies.iter().all(|s| s.rows.is_none() && !s.skipped));

    let local = strategy_files(&local_root);
    assert_eq!(local.len(), 3);
    assert_eq!(strategy_files(&worker_root), local);

    let keep = ExportOptions {
        only: Vec::new(),
        no_update: true,
    };
    let (again, served) = export_via_worker(&config, &backend, &worker_root, &keep).await;
    assert_eq!(served.expect("serve"), 0);
    assert!(again.expect("second export").strategies.iter().all(|s| s.skipped));
    assert_eq!(strategy_files(&worker_root), local);

    cleanup(&local_root);
    cleanup(&worker_root);
}

#[tokio::test]
async fn worker_export_rejects_duplicate_strategy_names() {
    let mut entities = BTreeMap::new();
    entities.insert(
        name("auth.users"),
        vec![
            StrategyConfig::new("all", StrategyKind::All),
            StrategyConfig::new("all", StrategyKind::All),
        ],
    );
    let config = Config {
        default_strategy: Some(StrategyConfig::new("all", StrategyKind::All)),
        entities,
        ..Config::default()
    };
    let backend = photofeed_backend();
    let root = temp_root("worker_collision");

    for no_update in [false, true] {
        let options = ExportOptions {
            only: Vec::new(),
            no_update,
        };
        let (report, served) = export_via_worker(&config, &backend, &root, &options).await;
        let err = report.expect_err("names collide");
        assert!(err.to_string().contains("unique per entity"), "{err}");
        served.expect("worker stops cleanly once the parent hangs up");
    }
    cleanup(&root);
}

#[tokio::test]
async fn unknown_strategies_stop_the_worker() {
    let config = config(PHOTOFEED);
    let registry = StrategyRegistry::new();
    let catalog = photofeed_catalog();
    let backend = MemoryBackend::new(catalog.clone());
    let transfer = transfer(&config, &registry);
    let mut handler = transfer.worker(&backend, &catalog).expect("worker");

    let request = ExportRequest {
        entity: name("auth.users"),
        strategy: "nope".to_string(),
        destination: temp_root("worker_unknown"),
    };
    let mut input = request.encode().expect("encode");
    input.push(0);
    let mut output = Vec::new();

    let err = serve(&input[..], &mut output, &mut handler)
        .await
        .expect_err("unknown strategy");
    assert!(err.to_string().contains("no strategy 'nope'"));
    assert!(output.is_empty());
}

#[cfg(unix)]
mod process {
    use std::path::Path;

    use tokio::process::Command;

    use devseed_core::SnapshotLayout;
    use devseed_transfer::{ExportRequest, TransferError, WorkerClient};

    use super::common::{cleanup, name, temp_root};

    fn shell(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        command
    }

    fn request(root: &Path) -> ExportRequest {
        ExportRequest {
            entity: name("auth.users"),
            strategy: "all".to_string(),
            destination: root.to_path_buf(),
        }
    }

    #[tokio::test]
    async fn response_is_renamed_into_place() {
        let root = temp_root("worker_ok");
        let output = SnapshotLayout::new(&root).strategy_file(&name("auth.users"), "all");
        let mut client =
            WorkerClient::spawn(shell("printf '[]\\000'; cat >/dev/null")).expect("spawn");

        let bytes = client.export(&request(&root), &output).await.expect("export");
        assert_eq!(bytes, 2);
        assert_eq!(std::fs::read_to_string(&output).expect("output"), "[]");
        client.finish().await.expect("clean exit");
        cleanup(&root);
    }

    #[tokio::test]
    async fn early_exit_reports_the_exit_code_and_leaves_no_file() {
        let root = temp_root("worker_exit");
        let output = SnapshotLayout::new(&root).strategy_file(&name("auth.users"), "all");
        let mut client = WorkerClient::spawn(shell("head -c 1 >/dev/null; printf '[{'; exit 3"))
            .expect("spawn");

        let err = client
            .export(&request(&root), &output)
            .await
            .expect_err("worker died");
        assert!(matches!(err, TransferError::WorkerExited { code: Some(3) }));
        assert!(!output.exists());
        let entity_dir = SnapshotLayout::new(&root).entity_dir(&name("auth.users"));
        let leftovers = std::fs::read_dir(&entity_dir)
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(leftovers, 0, "the partial response was discarded");
        cleanup(&root);
    }
}
