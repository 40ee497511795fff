use std::sync::Arc;
use tauri::{State, Window};
use tracing::info;

use crate::backend::{BackendStatus, BackendSupervisor};
use crate::logging::DEFAULT_TAIL_LINES;

/// Supervisor shared with the command handlers
pub struct BackendState(pub Arc<BackendSupervisor>);

#[tauri::command]
pub async fn get_backend_status(state: State<'_, BackendState>) -> Result<BackendStatus, String> {
    Ok(state.0.status().await)
}

#[tauri::command]
pub async fn get_backend_logs(
    state: State<'_, BackendState>,
    max_lines: Option<usize>,
) -> Result<String, String> {
    Ok(state.0.logs(max_lines.unwrap_or(DEFAULT_TAIL_LINES)))
}

#[tauri::command]
pub async fn minimize_window(window: Window) -> Result<(), String> {
    window.minimize().map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn maximize_window(window: Window) -> Result<(), String> {
    if window.is_maximized().unwrap_or(false) {
        window.unmaximize().map_err(|e| e.to_string())
    } else {
        window.maximize().map_err(|e| e.to_string())
    }
}

/// The backend is stopped by the window-destroyed handler once the last window is gone
#[tauri::command]
pub async fn close_window(window: Window) -> Result<(), String> {
    info!("Close window command received");
    window.close().map_err(|e| e.to_string())
}
