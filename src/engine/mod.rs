// Proxy engine. Each submodule corresponds to one component in the system
// overview; `state.rs` wires them together into the `Environment` the
// pipeline consults per-request and the `ProxyState` the Tauri commands see.

pub mod ca;
pub mod fuzzer;
pub mod gate;
pub mod http;
pub mod listener;
pub mod match_replace;
pub mod pipeline;
pub mod resender;
pub mod rules;
pub mod scope;
pub mod sink;
pub mod state;
pub mod storage;
