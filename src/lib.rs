pub mod app;
pub mod backend;
#[cfg(feature = "desktop")]
mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod port_manager;
pub mod process;

use tracing::{error, info};

use crate::app::{APP_NAME, APP_VERSION};
use crate::backend::BackendSupervisor;
use crate::config::SupervisorConfig;

pub use crate::error::SupervisorError;

/// Kill every backend tree this process spawned. Called from the panic hook,
/// where no supervisor instance is reachable.
pub fn cleanup_on_panic() {
    let killed = process::registry::kill_all();
    error!("Panic cleanup signalled {} backend process tree(s)", killed);
}

/// Headless host: supervise the backend until Ctrl+C
#[cfg(not(feature = "desktop"))]
pub fn run() -> anyhow::Result<()> {
    logging::init_tracing();
    let config = SupervisorConfig::load();
    let runtime = tokio::runtime::Runtime::new()?;

    runtime.block_on(async move {
        let supervisor = BackendSupervisor::new(config);
        supervisor.log().clear();
        supervisor
            .log()
            .info(&format!("Starting {} v{} (headless)", APP_NAME, APP_VERSION));

        let outcome = tokio::select! {
            result = supervisor.start() => result,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted during backend startup");
                supervisor.dispose().await;
                return Ok(());
            }
        };

        match outcome {
            Ok(backend::StartOutcome::Skipped) => return Ok(()),
            Ok(outcome) => info!("Backend running: {:?}", outcome),
            Err(e) => {
                supervisor.dispose().await;
                return Err(anyhow::Error::new(e).context("backend unavailable"));
            }
        }

        tokio::signal::ctrl_c().await?;
        info!("Shutting down");
        supervisor.dispose().await;
        Ok(())
    })
}

/// Desktop host: the backend starts in the background while the window loads
/// and is stopped with the last window or on exit
#[cfg(feature = "desktop")]
pub fn run() -> anyhow::Result<()> {
    use std::sync::Arc;
    use tauri::Manager;

    use crate::backend::PackagingLayout;
    use crate::commands::BackendState;

    logging::init_tracing();
    info!("Starting {} v{}", APP_NAME, APP_VERSION);
    let config = SupervisorConfig::load();

    let app = tauri::Builder::default()
        .setup(move |app| {
            let mut supervisor = BackendSupervisor::new(config.clone());
            // Bundled resources live where the packager put them
            if config.paths.resources_dir.is_none() {
                if let Ok(resources_dir) = app.path().resource_dir() {
                    let app_root = supervisor.layout().app_root.clone();
                    supervisor = supervisor.with_layout(PackagingLayout {
                        resources_dir,
                        app_root,
                    });
                }
            }

            let supervisor = Arc::new(supervisor);
            supervisor.log().clear();
            app.manage(BackendState(supervisor.clone()));

            tauri::async_runtime::spawn(async move {
                match supervisor.start().await {
                    Ok(outcome) => info!("Backend startup finished: {:?}", outcome),
                    Err(e) => error!("Backend unavailable: {}", e),
                }
            });
            Ok(())
        })
        .on_window_event(|window, event| {
            if let tauri::WindowEvent::Destroyed = event {
                let app = window.app_handle();
                let last_window = app
                    .webview_windows()
                    .keys()
                    .all(|label| label.as_str() == window.label());
                if let (true, Some(state)) = (last_window, app.try_state::<BackendState>()) {
                    let supervisor = state.0.clone();
                    tauri::async_runtime::block_on(supervisor.stop());
                }
            }
        })
        .invoke_handler(tauri::generate_handler![
            commands::get_backend_status,
            commands::get_backend_logs,
            commands::minimize_window,
            commands::maximize_window,
            commands::close_window,
        ])
        .build(tauri::generate_context!())?;

    app.run(|app, event| {
        if let tauri::RunEvent::ExitRequested { .. } | tauri::RunEvent::Exit = event {
            if let Some(state) = app.try_state::<BackendState>() {
                let supervisor = state.0.clone();
                tauri::async_runtime::block_on(supervisor.dispose());
            }
        }
    });
    Ok(())
}
