/// Build script
/// - Injects the application id used for per-user directories
/// - Processes tauri.conf.json when the desktop shell is enabled
fn main() {
    println!("cargo:rerun-if-changed=tauri.conf.json");

    // Normalize name for file system use (lowercase, alphanumeric + hyphens only)
    let name = std::env::var("CARGO_PKG_NAME").unwrap_or_else(|_| "companio".to_string());
    let app_id = name
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '-')
        .collect::<String>();

    println!("cargo:rustc-env=APP_ID={}", app_id);

    #[cfg(feature = "desktop")]
    tauri_build::build();
}
