// Tauri command surface, grouped by subsystem. Every command here is a thin
// wrapper: validate/deserialize the payload, call into `engine::`, map the
// error to a `String` at the boundary.

pub mod fuzzer;
pub mod interception;
pub mod listener;
pub mod match_replace;
pub mod resender;
pub mod rules;
pub mod scope;
