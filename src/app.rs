pub const APP_NAME: &str = "Companio";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const APP_ID: &str = env!("APP_ID");

/// File name of the packaged backend (`.exe` is appended on Windows)
pub const BACKEND_EXECUTABLE_NAME: &str = "Companio-Backend";
/// Directory under the resources root that holds the backend
pub const BACKEND_DIR_NAME: &str = "backend";
/// Fixed port shared with the UI layer's direct API calls
pub const BACKEND_PORT: u16 = 8000;

/// Variable the backend reads to find its writable storage
pub const APP_DATA_ENV: &str = "COMPANIO_APP_DIR";
pub const UNBUFFERED_ENV: &str = "PYTHONUNBUFFERED";
pub const SPEECH_LIBRARY_ENV: &str = "ESPEAK_LIBRARY";

pub const HOST_LOG_FILE: &str = "companio-log.txt";
pub const BACKEND_LAUNCH_LOG_FILE: &str = "backend-launch.log";
pub const LAUNCH_SCRIPT_NAME: &str = concat!(env!("APP_ID"), "-run-backend.sh");
pub const CONFIG_FILE_NAME: &str = "supervisor.json";
