use anyhow::Context;
use mcp_supervisor::{ServerStatus, Supervisor};
use std::time::Duration;
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG controls verbosity, e.g. RUST_LOG=mcp_supervisor=debug
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .init();

    tracing::info!("Starting supervise example");

    // Settings file path from the first argument, defaults otherwise.
    let supervisor = match std::env::args().nth(1) {
        Some(path) => Supervisor::from_config_file(&path)
            .with_context(|| format!("loading settings from {}", path))?,
        None => Supervisor::new(Default::default()).context("opening the default registry")?,
    };

    let mut monitor = supervisor.monitor();
    monitor.start()?;

    let first_pass = supervisor.reconcile_now().await?;
    println!("Registered servers:");
    for def in supervisor.list() {
        println!("- {} [{}] {}", def.name, def.status, def.script_path.display());
    }
    for change in &first_pass {
        println!(
            "Reconciled {}: {} -> {}",
            change.name, change.previous, change.current
        );
    }

    let duplicates = supervisor.find_duplicates().await?;
    for (name, groups) in &duplicates {
        let roots: Vec<u32> = groups.iter().map(|g| g.root().pid).collect();
        println!("{} has {} instances, root pids {:?}", name, groups.len(), roots);
    }

    // Start every stopped server and follow status changes for a while.
    let mut changes = supervisor.subscribe_status();
    for def in supervisor.list() {
        if !def.status.is_active() {
            if let Err(e) = supervisor.start(&def.name) {
                println!("Could not start {}: {}", def.name, e);
            }
        }
    }

    let follow = async {
        while let Ok(change) = changes.recv().await {
            println!(
                "[{}] {}: {} -> {}",
                change.at.format("%H:%M:%S"),
                change.name,
                change.previous,
                change.current
            );
        }
    };
    let _ = tokio::time::timeout(Duration::from_secs(10), follow).await;

    for def in supervisor.list() {
        println!("\n=== {} ===", def.name);
        for line in supervisor.recent_logs(&def.name, Some(10)) {
            println!("{}", line);
        }
        if let Some(error) = supervisor.last_error(&def.name) {
            println!("last error: {}", error);
        }
        if supervisor.status(&def.name)?.is_active() {
            if let Err(e) = supervisor.stop(&def.name) {
                println!("Could not stop {}: {}", def.name, e);
            }
        }
    }

    for def in supervisor.list() {
        if def.status == ServerStatus::Stopping {
            let _ = supervisor
                .wait_for_status(&def.name, ServerStatus::Stopped, Duration::from_secs(15))
                .await;
        }
    }

    monitor.stop()?;
    tracing::info!("supervise example finished");
    Ok(())
}
