// commands/resender.rs — Thin wrappers over the Resender.

use crate::atoms::types::{HeaderMap, ResenderTab, Transaction};
use crate::engine::resender::ResendEdits;
use crate::engine::state::ProxyState;
use tauri::State;
use uuid::Uuid;

#[tauri::command]
pub fn create_new_resender_tab(state: State<'_, ProxyState>, name: String) -> Result<ResenderTab, String> {
    Ok(state.resender.create_tab(&name))
}

#[tauri::command]
pub fn delete_resender_tab(state: State<'_, ProxyState>, tab_id: String) -> Result<(), String> {
    state.resender.delete_tab(&tab_id);
    Ok(())
}

#[tauri::command]
pub fn update_resender_tab_name(state: State<'_, ProxyState>, tab_id: String, name: String) -> Result<(), String> {
    state.resender.rename_tab(&tab_id, &name).map_err(Into::into)
}

#[tauri::command]
pub fn get_resender_tabs(state: State<'_, ProxyState>) -> Result<Vec<ResenderTab>, String> {
    Ok(state.resender.list_tabs())
}

#[tauri::command]
pub fn get_resender_request(state: State<'_, ProxyState>, request_id: Uuid) -> Result<Option<Transaction>, String> {
    state.storage.get_transaction(request_id).map_err(Into::into)
}

#[tauri::command]
pub fn send_resender_request(
    state: State<'_, ProxyState>,
    tab_id: String,
    request_id: Uuid,
    method: Option<String>,
    url: Option<String>,
    headers: Option<HeaderMap>,
    body: Option<Vec<u8>>,
) -> Result<(), String> {
    let base = state
        .storage
        .get_transaction(request_id)
        .map_err::<String, _>(Into::into)?
        .ok_or_else(|| format!("unknown request {request_id}"))?;
    state
        .resender
        .send(&tab_id, base, ResendEdits { method, url, headers, body })
        .map_err(Into::into)
}

#[tauri::command]
pub fn cancel_resender_request(state: State<'_, ProxyState>, tab_id: String) -> Result<(), String> {
    state.resender.cancel(&tab_id);
    Ok(())
}
