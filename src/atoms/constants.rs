// ── Proxy Atoms: Constants ──────────────────────────────────────────────────
// All named constants for the crate live here.
// Rationale: collecting constants in one place eliminates magic numbers,
// makes auditing easier, and keeps every layer's code self-documenting.

// ── CA / Certificate Mint (§4.1) ────────────────────────────────────────────
pub const CA_COMMON_NAME: &str = "ProKZee Root CA";
pub const CA_VALIDITY_YEARS: i64 = 10;
pub const LEAF_VALIDITY_BACKDATE_DAYS: i64 = 1;
pub const LEAF_VALIDITY_FORWARD_DAYS: i64 = 365;
/// Bounded LRU capacity for minted leaf certificates, keyed by exact SAN.
pub const LEAF_CACHE_CAPACITY: usize = 1024;

// ── HTTP(S) Pipeline (§4.6) ──────────────────────────────────────────────────
/// Loopback UI origins that are never intercepted, scoped, or rule-evaluated.
pub const UI_ORIGIN_HOSTS: &[&str] = &["prokzee", "wails.localhost"];
/// Upstream request total deadline.
pub const UPSTREAM_TIMEOUT_SECS: u64 = 60;
/// Response bodies larger than this are streamed in chunks and marked truncated.
pub const RESPONSE_BODY_CAP_BYTES: usize = 32 * 1024 * 1024;
/// Chunk size used once a response body exceeds the cap.
pub const RESPONSE_STREAM_CHUNK_BYTES: usize = 1024 * 1024;
/// Maximum bytes read for a single client request line + headers before a 400.
pub const MAX_REQUEST_HEAD_BYTES: usize = 64 * 1024;

// ── Interception Gate (§4.5) ────────────────────────────────────────────────
pub const INTERCEPTION_SUSPEND_TIMEOUT_SECS: u64 = 120;
pub const GATE_SWEEP_INTERVAL_SECS: u64 = 300;

// ── Sink Publisher (§4.7) ────────────────────────────────────────────────────
pub const SINK_CHANNEL_CAPACITY: usize = 1024;
pub const SINK_WORKER_COUNT: usize = 4;

// ── Listener / Interactsh (§4.8) ─────────────────────────────────────────────
pub const INTERACTSH_POLL_INTERVAL_SECS: u64 = 5;
pub const INTERACTSH_POLL_DEADLINE_SECS: u64 = 10;
pub const INTERACTSH_RSA_BITS: usize = 2048;

// ── Fuzzer (§4.10) ───────────────────────────────────────────────────────────
pub const FUZZER_DEFAULT_WORKERS: usize = 10;
pub const FUZZER_REQUEST_TIMEOUT_SECS: u64 = 30;
/// Emit a progress event every N completed iterations.
pub const FUZZER_PROGRESS_EVERY: u64 = 1;

// ── Config persistence keys ──────────────────────────────────────────────────
// Scope lists, rules, and match/replace rules are in-memory only for the
// life of the `Environment` — settings storage/project lifecycle is out of
// scope, so only the two keys the core itself needs to survive a restart
// (bind/port/interception config and the root CA) get a storage key.
pub(crate) const CONFIG_KEY_PROXY: &str = "proxy_config";
pub(crate) const CONFIG_KEY_ROOT_CA_MATERIAL: &str = "root_ca_material";
