// commands/rules.rs — Thin wrappers over the Rule Evaluator.

use crate::atoms::types::Rule;
use crate::engine::state::ProxyState;
use tauri::State;

#[tauri::command]
pub fn get_all_rules(state: State<'_, ProxyState>) -> Result<Vec<Rule>, String> {
    Ok(state.environment().rules.all_rules())
}

#[tauri::command]
pub fn add_rule(state: State<'_, ProxyState>, rule: Rule) -> Result<(), String> {
    state.environment().rules.add_rule(rule).map_err(Into::into)
}

#[tauri::command]
pub fn delete_rule(state: State<'_, ProxyState>, name: String) -> Result<(), String> {
    state.environment().rules.delete_rule(&name);
    Ok(())
}
