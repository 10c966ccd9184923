use mcp_supervisor::config::SupervisorConfig;
use mcp_supervisor::error::{Error, Result};
use mcp_supervisor::process::{ProcessNode, ProcessSnapshot, ProcessTable, SnapshotFilter, StopSignal};
use mcp_supervisor::{ServerDefinition, ServerStatus, Supervisor};
use mockall::mock;
use mockall::predicate::*;
use std::sync::Arc;
use std::time::Duration;

// Define a mock for the ProcessTable trait
mock! {
    pub Table {}

    impl ProcessTable for Table {
        fn snapshot(&self, filter: &SnapshotFilter) -> Result<ProcessSnapshot>;
        fn is_alive(&self, pid: u32) -> bool;
        fn signal(&self, pid: u32, signal: StopSignal) -> Result<()>;
    }
}

fn python(pid: u32, ppid: u32, script: &str) -> ProcessNode {
    ProcessNode::new(pid, Some(ppid), "python3", vec!["python3".into(), script.into()])
}

fn snapshot_of(nodes: Vec<ProcessNode>) -> ProcessSnapshot {
    ProcessSnapshot::from_nodes(nodes, &SnapshotFilter::default())
}

// Helper function to create a supervisor over a mock table
fn create_test_supervisor(table: MockTable) -> Result<(tempfile::TempDir, Supervisor)> {
    let dir = tempfile::tempdir().unwrap();
    let mut config = SupervisorConfig::rooted_at(dir.path());
    config.reconcile_interval_ms = 20;
    let supervisor = Supervisor::with_process_table(config, Arc::new(table))?;
    supervisor.add(ServerDefinition::new("weather", "/srv/weather/weather.py"))?;
    supervisor.add(ServerDefinition::new("notes", "/srv/notes/notes.py"))?;
    Ok((dir, supervisor))
}

#[tokio::test]
async fn test_snapshot_uses_worker_filter() -> Result<()> {
    let mut table = MockTable::new();
    table
        .expect_snapshot()
        .withf(|filter| {
            filter.exclude_pid == Some(std::process::id())
                && filter.names == vec!["python".to_string(), "uv".to_string()]
        })
        .times(1)
        .returning(|_| Ok(ProcessSnapshot::default()));

    let (_dir, supervisor) = create_test_supervisor(table)?;
    assert!(supervisor.reconcile_now().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_adopts_launcher_and_interpreter_as_one_instance() -> Result<()> {
    let mut table = MockTable::new();
    table.expect_snapshot().returning(|_| {
        Ok(snapshot_of(vec![
            ProcessNode::new(
                400,
                Some(1),
                "uv",
                vec!["uv".into(), "run".into(), "weather.py".into()],
            ),
            python(401, 400, "/srv/weather/weather.py"),
        ]))
    });
    table.expect_is_alive().with(eq(400)).returning(|_| true);

    let (_dir, supervisor) = create_test_supervisor(table)?;
    let mut changes = supervisor.subscribe_status();

    let applied = supervisor.reconcile_now().await?;
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].name, "weather");
    assert_eq!(applied[0].current, ServerStatus::Running);
    assert_eq!(supervisor.handle("weather").unwrap().pid, 400);
    assert_eq!(supervisor.status("notes")?, ServerStatus::Stopped);

    let published = changes.recv().await.unwrap();
    assert_eq!(published.name, "weather");

    assert!(supervisor.find_duplicates().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_duplicate_instances_reported() -> Result<()> {
    let mut table = MockTable::new();
    table.expect_snapshot().returning(|_| {
        Ok(snapshot_of(vec![
            python(500, 1, "notes.py"),
            python(600, 1, "/srv/notes/notes.py"),
            python(601, 600, "/srv/notes/notes.py"),
        ]))
    });

    let (_dir, supervisor) = create_test_supervisor(table)?;
    let duplicates = supervisor.find_duplicates().await?;

    assert_eq!(duplicates.len(), 1);
    let roots: Vec<u32> = duplicates["notes"].iter().map(|g| g.root().pid).collect();
    assert_eq!(roots, vec![500, 600]);
    Ok(())
}

#[tokio::test]
async fn test_snapshot_failure_surfaces_from_find_duplicates() -> Result<()> {
    let mut table = MockTable::new();
    table
        .expect_snapshot()
        .returning(|_| Err(Error::Process("process table unavailable".to_string())));

    let (_dir, supervisor) = create_test_supervisor(table)?;
    assert!(matches!(supervisor.find_duplicates().await, Err(Error::Process(_))));
    // Reconciliation still completes and changes nothing.
    assert!(supervisor.reconcile_now().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_stop_of_adopted_instance_signals_tree() -> Result<()> {
    let mut table = MockTable::new();
    let tree = || {
        snapshot_of(vec![
            python(700, 1, "/srv/weather/weather.py"),
            ProcessNode::new(701, Some(700), "node", vec!["node".into(), "helper.js".into()]),
        ])
    };
    table.expect_snapshot().returning(move |_| Ok(tree()));
    table
        .expect_signal()
        .with(function(|pid: &u32| *pid == 700 || *pid == 701), eq(StopSignal::Terminate))
        .times(2)
        .returning(|_, _| Ok(()));
    // Alive until the terminate lands.
    let alive = Arc::new(std::sync::atomic::AtomicBool::new(true));
    let seen = Arc::clone(&alive);
    table.expect_is_alive().returning(move |_| seen.swap(false, std::sync::atomic::Ordering::SeqCst));

    let (_dir, supervisor) = create_test_supervisor(table)?;
    supervisor.reconcile_now().await?;
    assert_eq!(supervisor.status("weather")?, ServerStatus::Running);

    alive.store(true, std::sync::atomic::Ordering::SeqCst);
    supervisor.stop("weather")?;
    supervisor
        .wait_for_status("weather", ServerStatus::Stopped, Duration::from_secs(5))
        .await?;
    Ok(())
}

#[tokio::test]
async fn test_stop_ends_stopped_when_process_survives_kill() -> Result<()> {
    let mut table = MockTable::new();
    table
        .expect_snapshot()
        .returning(|_| Ok(snapshot_of(vec![python(900, 1, "/srv/weather/weather.py")])));
    table
        .expect_signal()
        .with(eq(900), always())
        .returning(|pid, _| Err(Error::PermissionDenied { pid }));
    table.expect_is_alive().returning(|_| true);

    let dir = tempfile::tempdir().unwrap();
    let mut config = SupervisorConfig::rooted_at(dir.path());
    config.stop_timeout_ms = 100;
    config.kill_grace_ms = 100;
    config.stop_poll_interval_ms = 20;
    let supervisor = Supervisor::with_process_table(config, Arc::new(table))?;
    supervisor.add(ServerDefinition::new("weather", "/srv/weather/weather.py"))?;

    supervisor.reconcile_now().await?;
    assert_eq!(supervisor.handle("weather").unwrap().pid, 900);

    supervisor.stop("weather")?;
    supervisor
        .wait_for_status("weather", ServerStatus::Stopped, Duration::from_secs(5))
        .await?;
    assert!(supervisor.handle("weather").is_none());
    let error = supervisor.last_error("weather").unwrap();
    assert!(error.contains("Permission denied"), "{}", error);
    assert!(
        supervisor
            .recent_logs("weather", None)
            .iter()
            .any(|line| line.contains("Stop incomplete"))
    );

    // The survivor is picked up again.
    let changes = supervisor.reconcile_now().await?;
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].current, ServerStatus::Running);
    Ok(())
}

#[tokio::test]
async fn test_monitor_runs_passes() -> Result<()> {
    let mut table = MockTable::new();
    table
        .expect_snapshot()
        .returning(|_| Ok(snapshot_of(vec![python(800, 1, "weather.py")])));
    table.expect_is_alive().returning(|_| true);

    let (_dir, supervisor) = create_test_supervisor(table)?;
    let mut monitor = supervisor.monitor();
    monitor.start()?;
    assert!(monitor.is_running());

    supervisor
        .wait_for_status("weather", ServerStatus::Running, Duration::from_secs(5))
        .await?;
    tokio::time::timeout(Duration::from_secs(5), async {
        while monitor.passes() < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .map_err(|_| Error::Timeout("monitor passes".to_string()))?;

    monitor.stop()?;
    assert!(!monitor.is_running());
    Ok(())
}
