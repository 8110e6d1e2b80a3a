// ProKZee proxy engine — Tauri entry point.
//
// Boots the storage sink, loads or mints the root CA, builds `ProxyState`,
// and starts the HTTP(S) pipeline listener as a background task. Commands
// are grouped by subsystem and registered via a single `generate_handler!`.

pub mod atoms;
pub mod commands;
pub mod engine;

use atoms::constants::{CONFIG_KEY_PROXY, CONFIG_KEY_ROOT_CA_MATERIAL};
use atoms::types::ProxyConfig;
use engine::ca::RootCaMaterial;
use engine::state::ProxyState;
use engine::storage::StorageSink;
use log::info;
use std::sync::Arc;
use tauri::Manager;

fn storage_path(app: &tauri::AppHandle) -> std::path::PathBuf {
    app.path()
        .app_data_dir()
        .unwrap_or_else(|_| std::path::PathBuf::from("."))
        .join("prokzee.sqlite")
}

/// Installed once at startup so spans/events carry structured fields
/// (connection id, transaction id, host) that plain `log::` call sites
/// don't attach; `tauri-plugin-log` remains the sink for `log::` macros.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    init_tracing();
    tauri::Builder::default()
        .plugin(tauri_plugin_opener::init())
        .plugin(tauri_plugin_shell::init())
        .plugin(tauri_plugin_fs::init())
        .plugin(tauri_plugin_process::init())
        .plugin(tauri_plugin_updater::Builder::new().build())
        .plugin(tauri_plugin_log::Builder::new().build())
        .setup(|app| {
            let handle = app.handle().clone();
            let path = storage_path(&handle);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).ok();
            }
            let storage = Arc::new(StorageSink::open(&path)?);

            let config: ProxyConfig = storage.get_config(CONFIG_KEY_PROXY)?.unwrap_or_default();
            let ca_material: Option<(String, String)> = storage.get_config(CONFIG_KEY_ROOT_CA_MATERIAL)?;
            let ca_material = ca_material.map(|(cert_pem, key_pem)| RootCaMaterial { cert_pem, key_pem });

            let state = ProxyState::bootstrap(handle.clone(), storage, config, ca_material)?;
            let bind_addr = {
                let cfg = state.config.lock();
                format!("{}:{}", cfg.bind_address, cfg.port)
            };
            let env = state.environment();

            tauri::async_runtime::spawn(async move {
                if let Err(e) = engine::pipeline::run_listener(env, bind_addr).await {
                    log::error!("[lib] pipeline listener exited: {e}");
                }
            });

            info!("[lib] proxy engine ready");
            app.manage(state);
            Ok(())
        })
        .on_window_event(|window, event| {
            if let tauri::WindowEvent::Destroyed = event {
                if let Some(state) = window.app_handle().try_state::<ProxyState>() {
                    state.shutdown();
                }
            }
        })
        .invoke_handler(tauri::generate_handler![
            // ── Interception ────────────────────────────────────────────
            commands::interception::toggle_interception,
            commands::interception::get_interception_state,
            commands::interception::approve_request,
            // ── Scope ───────────────────────────────────────────────────
            commands::scope::update_in_scope_list,
            commands::scope::update_out_of_scope_list,
            commands::scope::add_to_in_scope,
            commands::scope::add_to_out_of_scope,
            commands::scope::get_scope_lists,
            // ── Rules ───────────────────────────────────────────────────
            commands::rules::get_all_rules,
            commands::rules::add_rule,
            commands::rules::delete_rule,
            // ── Match/Replace ───────────────────────────────────────────
            commands::match_replace::get_all_match_replace_rules,
            commands::match_replace::add_match_replace_rule,
            commands::match_replace::delete_match_replace_rule,
            commands::match_replace::update_match_replace_rule,
            // ── Resender ────────────────────────────────────────────────
            commands::resender::create_new_resender_tab,
            commands::resender::send_resender_request,
            commands::resender::cancel_resender_request,
            commands::resender::delete_resender_tab,
            commands::resender::update_resender_tab_name,
            commands::resender::get_resender_tabs,
            commands::resender::get_resender_request,
            // ── Fuzzer ──────────────────────────────────────────────────
            commands::fuzzer::start_fuzzer,
            commands::fuzzer::stop_fuzzer,
            commands::fuzzer::add_fuzzer_tab,
            commands::fuzzer::remove_fuzzer_tab,
            commands::fuzzer::update_fuzzer_tab,
            commands::fuzzer::update_fuzzer_tab_name,
            commands::fuzzer::get_fuzzer_tabs,
            // ── Listener ────────────────────────────────────────────────
            commands::listener::start_listening,
            commands::listener::stop_listening,
            commands::listener::generate_new_domain,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
