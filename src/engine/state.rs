// Proxy aggregate state.
//
// Design note (addresses "global mutable proxy state" / "cyclic references
// between components"): the pipeline never holds direct fields for each
// subsystem. It holds one `Arc<Environment>` snapshot, swapped atomically
// on project/config changes rather than rewired component-by-component.
// `ProxyState` is the Tauri-managed aggregate; it owns the `Environment`
// plus the subsystems the pipeline doesn't touch on its hot path (resender,
// fuzzer, listener, storage).

use crate::atoms::constants::{CONFIG_KEY_ROOT_CA_MATERIAL, UPSTREAM_TIMEOUT_SECS};
use crate::atoms::error::ProxyResult;
use crate::atoms::types::ProxyConfig;
use crate::engine::ca::{CertMint, RootCaMaterial};
use crate::engine::fuzzer::Fuzzer;
use crate::engine::gate::InterceptionGate;
use crate::engine::listener::InteractshListener;
use crate::engine::match_replace::MatchReplaceEngine;
use crate::engine::resender::Resender;
use crate::engine::rules::RuleEvaluator;
use crate::engine::scope::ScopeEvaluator;
use crate::engine::sink::SinkPublisher;
use crate::engine::storage::StorageSink;
use parking_lot::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tauri::AppHandle;

/// Snapshot of everything the HTTP(S) pipeline consults per-request.
pub struct Environment {
    pub scope: Arc<ScopeEvaluator>,
    pub rules: Arc<RuleEvaluator>,
    pub match_replace: Arc<MatchReplaceEngine>,
    pub gate: Arc<InterceptionGate>,
    pub cert_mint: Arc<CertMint>,
    pub sink: Arc<SinkPublisher>,
    pub upstream: reqwest::Client,
    pub interception_enabled: Arc<AtomicBool>,
    pub cancel: Arc<AtomicBool>,
}

pub struct ProxyState {
    pub env: Mutex<Arc<Environment>>,
    pub resender: Arc<Resender>,
    pub fuzzer: Arc<Fuzzer>,
    pub listener: Arc<InteractshListener>,
    pub storage: Arc<StorageSink>,
    pub config: Mutex<ProxyConfig>,
}

impl ProxyState {
    pub fn bootstrap(app: AppHandle, storage: Arc<StorageSink>, config: ProxyConfig, ca_material: Option<RootCaMaterial>) -> ProxyResult<Self> {
        let cert_mint = Arc::new(match ca_material {
            Some(material) => CertMint::from_material(material)?,
            None => {
                let (mint, material) = CertMint::generate()?;
                storage.set_config(CONFIG_KEY_ROOT_CA_MATERIAL, &(material.cert_pem.clone(), material.key_pem.clone()))?;
                mint
            }
        });

        // No `gzip`/`brotli`/`deflate` cargo features are enabled, so
        // reqwest never transparently decompresses — the pipeline always
        // sees and forwards the exact bytes the upstream sent.
        let upstream = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(UPSTREAM_TIMEOUT_SECS))
            .http1_only()
            .build()
            .map_err(crate::atoms::error::ProxyError::Upstream)?;

        let gate = Arc::new(InterceptionGate::new());
        let cancel = Arc::new(AtomicBool::new(false));
        crate::engine::gate::spawn_sweeper(gate.clone(), cancel.clone());

        let sink = Arc::new(SinkPublisher::spawn(storage.clone(), app.clone(), cancel.clone()));

        let env = Arc::new(Environment {
            scope: Arc::new(ScopeEvaluator::new()),
            rules: Arc::new(RuleEvaluator::new()),
            match_replace: Arc::new(MatchReplaceEngine::new()),
            gate,
            cert_mint,
            sink,
            upstream: upstream.clone(),
            interception_enabled: Arc::new(AtomicBool::new(config.interception_enabled)),
            cancel,
        });

        let resender = Arc::new(Resender::new(storage.clone(), upstream.clone()));
        resender.attach_app_handle(app.clone());

        let fuzzer = Arc::new(Fuzzer::new(reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(crate::atoms::constants::FUZZER_REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(crate::atoms::error::ProxyError::Upstream)?));
        fuzzer.attach_app_handle(app.clone());

        let listener = Arc::new(InteractshListener::new(app, config.interactsh_server_url.clone()));

        Ok(ProxyState {
            env: Mutex::new(env),
            resender,
            fuzzer,
            listener,
            storage,
            config: Mutex::new(config),
        })
    }

    pub fn environment(&self) -> Arc<Environment> {
        self.env.lock().clone()
    }

    pub fn set_interception_enabled(&self, enabled: bool) {
        let env = self.environment();
        env.interception_enabled.store(enabled, std::sync::atomic::Ordering::Relaxed);
        env.gate.set_enabled(enabled);
        self.config.lock().interception_enabled = enabled;
    }

    pub fn is_interception_enabled(&self) -> bool {
        self.environment().interception_enabled.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn shutdown(&self) {
        self.environment().cancel.store(true, std::sync::atomic::Ordering::SeqCst);
        self.listener.stop();
    }
}
