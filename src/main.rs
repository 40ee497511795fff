// Prevents additional console window on Windows in release builds
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

fn main() {
    // A panicking host must not orphan the backend
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("Application panic: {:?}", panic_info);
        companio_lib::cleanup_on_panic();
        std::process::exit(1);
    }));

    if let Err(e) = companio_lib::run() {
        eprintln!("companio: {:#}", e);
        std::process::exit(1);
    }
}
