// commands/listener.rs — Thin wrappers over the Interactsh Listener.

use crate::engine::state::ProxyState;
use tauri::State;

#[tauri::command]
pub async fn start_listening(state: State<'_, ProxyState>) -> Result<(), String> {
    state.listener.start().await.map_err(Into::into)
}

#[tauri::command]
pub fn stop_listening(state: State<'_, ProxyState>) -> Result<(), String> {
    state.listener.stop();
    Ok(())
}

#[tauri::command]
pub async fn generate_new_domain(state: State<'_, ProxyState>) -> Result<String, String> {
    state.listener.rotate_domain().await.map_err(Into::into)
}
