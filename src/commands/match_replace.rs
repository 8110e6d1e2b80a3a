// commands/match_replace.rs — Thin wrappers over the Match/Replace Engine.

use crate::atoms::types::MatchReplaceRule;
use crate::engine::state::ProxyState;
use tauri::State;

#[tauri::command]
pub fn get_all_match_replace_rules(state: State<'_, ProxyState>) -> Result<Vec<MatchReplaceRule>, String> {
    Ok(state.environment().match_replace.all_rules())
}

#[tauri::command]
pub fn add_match_replace_rule(state: State<'_, ProxyState>, rule: MatchReplaceRule) -> Result<(), String> {
    state.environment().match_replace.add_rule(rule).map_err(Into::into)
}

#[tauri::command]
pub fn delete_match_replace_rule(state: State<'_, ProxyState>, name: String) -> Result<(), String> {
    state.environment().match_replace.delete_rule(&name);
    Ok(())
}

#[tauri::command]
pub fn update_match_replace_rule(state: State<'_, ProxyState>, rule: MatchReplaceRule) -> Result<(), String> {
    state.environment().match_replace.update_rule(rule).map_err(Into::into)
}
