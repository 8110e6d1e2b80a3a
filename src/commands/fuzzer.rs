// commands/fuzzer.rs — Thin wrappers over the Fuzzer.

use crate::atoms::types::FuzzerTab;
use crate::engine::state::ProxyState;
use tauri::State;

#[tauri::command]
pub fn add_fuzzer_tab(state: State<'_, ProxyState>, tab: FuzzerTab) -> Result<(), String> {
    state.fuzzer.create_tab(tab);
    Ok(())
}

#[tauri::command]
pub fn update_fuzzer_tab(state: State<'_, ProxyState>, tab: FuzzerTab) -> Result<(), String> {
    state.fuzzer.update_tab(tab).map_err(Into::into)
}

#[tauri::command]
pub fn update_fuzzer_tab_name(state: State<'_, ProxyState>, mut tab: FuzzerTab, name: String) -> Result<(), String> {
    tab.name = name;
    state.fuzzer.update_tab(tab).map_err(Into::into)
}

#[tauri::command]
pub fn remove_fuzzer_tab(state: State<'_, ProxyState>, tab_id: String) -> Result<(), String> {
    state.fuzzer.delete_tab(&tab_id);
    Ok(())
}

#[tauri::command]
pub fn get_fuzzer_tabs(state: State<'_, ProxyState>) -> Result<Vec<FuzzerTab>, String> {
    Ok(state.fuzzer.list_tabs())
}

#[tauri::command]
pub fn start_fuzzer(state: State<'_, ProxyState>, tab_id: String) -> Result<(), String> {
    let workers = state.config.lock().fuzzer_workers;
    state.fuzzer.start(&tab_id, workers).map_err(Into::into)
}

#[tauri::command]
pub fn stop_fuzzer(state: State<'_, ProxyState>, tab_id: String) -> Result<(), String> {
    state.fuzzer.stop(&tab_id);
    Ok(())
}
