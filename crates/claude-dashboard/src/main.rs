mod bootstrap;
mod report;

use anyhow::Result;
use monitor_core::settings::{state_dir, MonitorPaths, Settings};
use monitor_runtime::orchestrator::{DashboardState, MonitoringOrchestrator, OrchestratorConfig};
use monitor_runtime::process_source::SystemProcessSource;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load();
    let state = state_dir();

    bootstrap::ensure_directories(&state)?;
    bootstrap::setup_logging(&settings.log_level, settings.log_file.as_deref())?;

    tracing::info!("Claude dashboard v{} starting", env!("CARGO_PKG_VERSION"));

    let claude_dir = match &settings.claude_dir {
        Some(dir) => dir.clone(),
        None => dirs::home_dir()
            .and_then(|home| bootstrap::discover_claude_dir(&home))
            .unwrap_or_else(|| settings.claude_dir()),
    };
    let mut config = OrchestratorConfig::from_settings(&settings);
    config.paths = MonitorPaths::new(&claude_dir, &state);
    tracing::info!(
        claude_dir = %claude_dir.display(),
        range = %config.range,
        "configuration resolved"
    );

    if settings.once {
        let mut dashboard = DashboardState::new(&config, SystemProcessSource::new());
        dashboard.refresh_all().await;
        let snapshot = dashboard.snapshot();
        if settings.json {
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        } else {
            print!("{}", report::render_report(&snapshot));
        }
        return Ok(());
    }

    let orchestrator = MonitoringOrchestrator::new(config, SystemProcessSource::new());
    let (mut rx, handle) = orchestrator.start();
    let mut first = true;
    let mut printed_seq: Option<usize> = None;

    loop {
        tokio::select! {
            snapshot = rx.recv() => {
                let Some(snapshot) = snapshot else {
                    tracing::warn!("monitoring task ended");
                    break;
                };
                if settings.json {
                    println!("{}", serde_json::to_string(&snapshot)?);
                } else if first {
                    print!("{}", report::render_report(&snapshot));
                } else {
                    // A rotated log restarts positions at zero.
                    if printed_seq.is_some_and(|seq| seq >= snapshot.record_count) {
                        printed_seq = None;
                    }
                    let fresh: Vec<_> = snapshot
                        .events
                        .iter()
                        .filter(|e| printed_seq.map_or(true, |seq| e.seq > seq))
                        .cloned()
                        .collect();
                    print!("{}", report::render_events(&fresh));
                    println!("{}", report::render_compact(&snapshot));
                }
                if let Some(last) = snapshot.events.last() {
                    printed_seq = Some(last.seq);
                }
                first = false;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received; shutting down monitoring task");
                break;
            }
        }
    }

    handle.abort();
    Ok(())
}
