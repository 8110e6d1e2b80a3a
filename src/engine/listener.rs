// Interactsh Listener (spec §4.8).
//
// Long-polls an out-of-band interaction server, decrypting AES-CFB wrapped
// payloads with a locally generated RSA-2048 key. Grounded on the teacher's
// long-poll bridge (`engine/telegram.rs`, since folded in here): an
// `AtomicBool` running flag, capped exponential backoff on poll failure, and
// `app_handle.emit` status events.

use crate::atoms::constants::{
    INTERACTSH_POLL_DEADLINE_SECS, INTERACTSH_POLL_INTERVAL_SECS, INTERACTSH_RSA_BITS,
};
use crate::atoms::error::{ProxyError, ProxyResult};
use crate::atoms::types::{InteractshIdentity, InteractshInteraction};
use crate::engine::http::reconnect_delay;
use aes::cipher::{KeyIvInit, StreamCipher};
use base64::Engine as _;
use log::{error, info, warn};
use parking_lot::Mutex;
use rand_core::OsRng;
use rsa::pkcs1::EncodeRsaPublicKey;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use serde::Deserialize;
use sha2::Sha256;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tauri::{AppHandle, Emitter};

type Aes256Cfb = cfb_mode::Decryptor<aes::Aes256>;

struct ListenerKeys {
    private_key: RsaPrivateKey,
    public_key_pem: String,
}

pub struct InteractshListener {
    server_url: Mutex<String>,
    client: reqwest::Client,
    app: AppHandle,
    keys: Mutex<Option<ListenerKeys>>,
    identity: Mutex<Option<InteractshIdentity>>,
    running: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    generation: AtomicU32,
}

impl InteractshListener {
    pub fn new(app: AppHandle, server_url: String) -> Self {
        InteractshListener {
            server_url: Mutex::new(server_url),
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(INTERACTSH_POLL_DEADLINE_SECS))
                .build()
                .expect("reqwest client"),
            app,
            keys: Mutex::new(None),
            identity: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
            generation: AtomicU32::new(0),
        }
    }

    pub fn current_domain(&self) -> Option<String> {
        self.identity.lock().as_ref().map(|i| i.subdomain.clone())
    }

    /// Generate a keypair, register, and spawn the poll loop.
    pub async fn start(self: &Arc<Self>) -> ProxyResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(()); // already running
        }
        self.paused.store(false, Ordering::SeqCst);
        let my_generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let identity = self.generate_and_register().await?;
        *self.identity.lock() = Some(identity);

        let this = self.clone();
        tokio::spawn(async move { this.poll_loop(my_generation).await });
        Ok(())
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    /// New registration + keypair; the old one is deregistered best-effort.
    pub async fn rotate_domain(self: &Arc<Self>) -> ProxyResult<String> {
        let old = self.identity.lock().clone();
        if let Some(old) = old {
            let _ = self.deregister(&old).await;
        }
        let identity = self.generate_and_register().await?;
        let domain = identity.subdomain.clone();
        *self.identity.lock() = Some(identity);
        Ok(domain)
    }

    async fn generate_and_register(&self) -> ProxyResult<InteractshIdentity> {
        let private_key = RsaPrivateKey::new(&mut OsRng, INTERACTSH_RSA_BITS)
            .map_err(|e| ProxyError::Other(format!("rsa keygen: {e}")))?;
        let public_key = RsaPublicKey::from(&private_key);
        let public_key_pem = public_key
            .to_pkcs1_pem(rsa::pkcs8::LineEnding::LF)
            .map_err(|e| ProxyError::Other(format!("rsa pem encode: {e}")))?;

        let correlation_id = uuid::Uuid::now_v7().simple().to_string()[..20].to_string();
        let secret_key = uuid::Uuid::now_v7().to_string();

        *self.keys.lock() = Some(ListenerKeys { private_key: private_key.clone(), public_key_pem: public_key_pem.clone() });

        let server_url = self.server_url.lock().clone();
        let resp = self
            .client
            .post(format!("{server_url}/register"))
            .json(&RegisterRequest {
                public_key: public_key_pem,
                secret_key: secret_key.clone(),
                correlation_id: correlation_id.clone(),
            })
            .send()
            .await
            .map_err(ProxyError::Upstream)?;

        if !resp.status().is_success() {
            let msg = format!("interactsh registration failed: {}", resp.status());
            error!("[listener] {msg}");
            self.app.emit("backend:listenerError", &msg).ok();
            return Err(ProxyError::Other(msg));
        }

        // The register endpoint only acknowledges the registration (e.g.
        // `{"msg": "registration successful"}`) — it never echoes back a
        // subdomain, so there is nothing to parse out of the body beyond a
        // diagnostic message. The subdomain is `correlation_id + "." + host`
        // by the wire protocol itself (see DESIGN.md Open Question decisions).
        let body: RegisterResponse = resp.json().await.unwrap_or_default();
        if let Some(msg) = body.msg {
            info!("[listener] register response: {msg}");
        }

        let subdomain = format!("{correlation_id}.{}", server_host(&server_url));
        info!("[listener] registered as {subdomain}");
        Ok(InteractshIdentity { correlation_id, secret_key, subdomain })
    }

    async fn deregister(&self, identity: &InteractshIdentity) -> ProxyResult<()> {
        let server_url = self.server_url.lock().clone();
        self.client
            .post(format!("{server_url}/deregister"))
            .json(&DeregisterRequest {
                correlation_id: identity.correlation_id.clone(),
                secret_key: identity.secret_key.clone(),
            })
            .send()
            .await
            .map_err(ProxyError::Upstream)?;
        Ok(())
    }

    async fn poll_loop(self: Arc<Self>, my_generation: u32) {
        let mut failed_attempts: u32 = 0;
        loop {
            if !self.running.load(Ordering::SeqCst) || self.generation.load(Ordering::SeqCst) != my_generation {
                break;
            }
            if self.paused.load(Ordering::SeqCst) {
                tokio::time::sleep(std::time::Duration::from_secs(INTERACTSH_POLL_INTERVAL_SECS)).await;
                continue;
            }

            match self.poll_once().await {
                Ok(interactions) => {
                    failed_attempts = 0;
                    for interaction in interactions {
                        self.app.emit("backend:interaction", &interaction).ok();
                    }
                    tokio::time::sleep(std::time::Duration::from_secs(INTERACTSH_POLL_INTERVAL_SECS)).await;
                }
                Err(e) => {
                    warn!("[listener] poll failed: {e}");
                    reconnect_delay(failed_attempts).await;
                    failed_attempts = failed_attempts.saturating_add(1);
                }
            }
        }
    }

    async fn poll_once(&self) -> ProxyResult<Vec<InteractshInteraction>> {
        let identity = self.identity.lock().clone().ok_or_else(|| ProxyError::Other("not registered".into()))?;
        let server_url = self.server_url.lock().clone();
        let resp: PollResponse = self
            .client
            .get(format!("{server_url}/poll"))
            .query(&[("id", identity.correlation_id.as_str()), ("secret", identity.secret_key.as_str())])
            .send()
            .await
            .map_err(ProxyError::Upstream)?
            .json()
            .await
            .map_err(ProxyError::Upstream)?;

        let private_key = self
            .keys
            .lock()
            .as_ref()
            .map(|k| k.private_key.clone())
            .ok_or_else(|| ProxyError::Other("no keypair".into()))?;

        let mut out = Vec::with_capacity(resp.data.len());
        for envelope_b64 in resp.data {
            match decrypt_envelope(&private_key, &envelope_b64) {
                Ok(interaction) => out.push(interaction),
                Err(e) => warn!("[listener] dropped undecryptable envelope: {e}"),
            }
        }
        Ok(out)
    }
}

#[derive(serde::Serialize)]
struct RegisterRequest {
    #[serde(rename = "public-key")]
    public_key: String,
    #[serde(rename = "secret-key")]
    secret_key: String,
    #[serde(rename = "correlation-id")]
    correlation_id: String,
}

#[derive(serde::Serialize)]
struct DeregisterRequest {
    #[serde(rename = "correlation-id")]
    correlation_id: String,
    #[serde(rename = "secret-key")]
    secret_key: String,
}

#[derive(Deserialize, Default)]
struct RegisterResponse {
    #[serde(default)]
    msg: Option<String>,
}

#[derive(Deserialize)]
struct PollResponse {
    data: Vec<String>,
}

#[derive(Deserialize, serde::Serialize)]
struct Envelope {
    #[serde(rename = "aes_key")]
    aes_key: String,
    data: String,
}

/// `{aes_key, data}`: `aes_key` is RSA-OAEP-SHA256 wrapped; `data` is
/// base64 of a 16-byte IV followed by AES-256-CFB ciphertext.
fn decrypt_envelope(private_key: &RsaPrivateKey, envelope_b64: &str) -> ProxyResult<InteractshInteraction> {
    let raw = base64::engine::general_purpose::STANDARD
        .decode(envelope_b64)
        .map_err(|e| ProxyError::Other(format!("envelope base64: {e}")))?;
    let envelope: Envelope =
        serde_json::from_slice(&raw).map_err(|e| ProxyError::Other(format!("envelope json: {e}")))?;

    let wrapped_key = base64::engine::general_purpose::STANDARD
        .decode(&envelope.aes_key)
        .map_err(|e| ProxyError::Other(format!("aes_key base64: {e}")))?;
    let aes_key = private_key
        .decrypt(Oaep::new::<Sha256>(), &wrapped_key)
        .map_err(|e| ProxyError::Other(format!("rsa-oaep unwrap: {e}")))?;

    let ciphertext = base64::engine::general_purpose::STANDARD
        .decode(&envelope.data)
        .map_err(|e| ProxyError::Other(format!("data base64: {e}")))?;
    if ciphertext.len() < 16 {
        return Err(ProxyError::Other("envelope data shorter than IV".into()));
    }
    let (iv, body) = ciphertext.split_at(16);
    let mut buf = body.to_vec();
    let mut cipher = Aes256Cfb::new_from_slices(&aes_key, iv)
        .map_err(|e| ProxyError::Other(format!("aes-cfb init: {e}")))?;
    cipher.decrypt(&mut buf);

    serde_json::from_slice(&buf).map_err(|e| ProxyError::Other(format!("interaction json: {e}")))
}

fn server_host(server_url: &str) -> String {
    server_url
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_host_strips_scheme() {
        assert_eq!(server_host("https://interact.sh"), "interact.sh");
        assert_eq!(server_host("http://oast.pro/"), "oast.pro");
    }

    #[test]
    fn decrypt_envelope_roundtrips_a_hand_built_payload() {
        use aes::cipher::KeyIvInit as _;

        let mut rng = OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, 1024).unwrap(); // small key, test-only
        let public_key = RsaPublicKey::from(&private_key);

        let aes_key = [7u8; 32];
        let iv = [1u8; 16];
        let interaction = InteractshInteraction {
            protocol: "dns".into(),
            unique_id: "abc".into(),
            full_id: "abc.oast".into(),
            raw_request: None,
            remote_address: Some("203.0.113.1".into()),
            timestamp: chrono::Utc::now(),
        };
        let plaintext = serde_json::to_vec(&interaction).unwrap();
        let mut ciphertext = plaintext.clone();
        let mut enc = cfb_mode::Encryptor::<aes::Aes256>::new_from_slices(&aes_key, &iv).unwrap();
        use aes::cipher::StreamCipher as _;
        enc.encrypt(&mut ciphertext);

        let wrapped_key = public_key.encrypt(&mut rng, Oaep::new::<Sha256>(), &aes_key).unwrap();

        let mut data_with_iv = iv.to_vec();
        data_with_iv.extend_from_slice(&ciphertext);

        let envelope = Envelope {
            aes_key: base64::engine::general_purpose::STANDARD.encode(wrapped_key),
            data: base64::engine::general_purpose::STANDARD.encode(data_with_iv),
        };
        let envelope_json = serde_json::to_vec(&envelope).unwrap();
        let envelope_b64 = base64::engine::general_purpose::STANDARD.encode(envelope_json);

        let decoded = decrypt_envelope(&private_key, &envelope_b64).expect("decrypt");
        assert_eq!(decoded.unique_id, "abc");
        assert_eq!(decoded.remote_address.as_deref(), Some("203.0.113.1"));
    }
}
