// commands/scope.rs — Thin wrappers over the Scope Evaluator.

use crate::atoms::types::ScopeListSpec;
use crate::engine::state::ProxyState;
use tauri::State;

#[tauri::command]
pub fn update_in_scope_list(state: State<'_, ProxyState>, patterns: Vec<String>) -> Result<(), String> {
    state.environment().scope.set_in(patterns).map_err(Into::into)
}

#[tauri::command]
pub fn update_out_of_scope_list(state: State<'_, ProxyState>, patterns: Vec<String>) -> Result<(), String> {
    state.environment().scope.set_out(patterns).map_err(Into::into)
}

#[tauri::command]
pub fn add_to_in_scope(state: State<'_, ProxyState>, pattern: String) -> Result<(), String> {
    state.environment().scope.add_in(&pattern).map_err(Into::into)
}

#[tauri::command]
pub fn add_to_out_of_scope(state: State<'_, ProxyState>, pattern: String) -> Result<(), String> {
    state.environment().scope.add_out(&pattern).map_err(Into::into)
}

#[tauri::command]
pub fn get_scope_lists(state: State<'_, ProxyState>) -> Result<ScopeListSpec, String> {
    Ok(state.environment().scope.to_spec())
}
