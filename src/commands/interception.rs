// commands/interception.rs — Thin wrappers over the Interception Gate and
// the global interception toggle.

use crate::atoms::types::ApprovalResponse;
use crate::engine::state::ProxyState;
use tauri::State;
use uuid::Uuid;

#[tauri::command]
pub fn toggle_interception(state: State<'_, ProxyState>, enabled: bool) -> Result<(), String> {
    state.set_interception_enabled(enabled);
    Ok(())
}

#[tauri::command]
pub fn get_interception_state(state: State<'_, ProxyState>) -> Result<bool, String> {
    Ok(state.is_interception_enabled())
}

#[tauri::command]
pub fn approve_request(state: State<'_, ProxyState>, id: Uuid, response: ApprovalResponse) -> Result<bool, String> {
    Ok(state.environment().gate.resolve(id, response))
}
