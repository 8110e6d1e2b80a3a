// Resender (spec §4.9).
//
// Replays a stored request with edits against its origin. Each tab owns an
// ordered list of transaction ids plus a cursor and at most one in-flight
// task, tracked by `AbortHandle` — grounded on the teacher's
// `engine/state.rs` `active_runs` map.

use crate::atoms::error::{ProxyError, ProxyResult};
use crate::atoms::types::{HeaderMap, ResenderTab, Transaction};
use crate::engine::storage::StorageSink;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tauri::{AppHandle, Emitter};
use tokio::task::AbortHandle;
use uuid::Uuid;

/// What the UI sends when it asks to resend, with optional edits applied
/// on top of the stored request.
pub struct ResendEdits {
    pub method: Option<String>,
    pub url: Option<String>,
    pub headers: Option<HeaderMap>,
    pub body: Option<Vec<u8>>,
}

struct TabEntry {
    tab: ResenderTab,
    in_flight: Option<AbortHandle>,
}

pub struct Resender {
    tabs: Mutex<HashMap<String, TabEntry>>,
    storage: Arc<StorageSink>,
    upstream: reqwest::Client,
    app: Mutex<Option<AppHandle>>,
}

impl Resender {
    pub fn new(storage: Arc<StorageSink>, upstream: reqwest::Client) -> Self {
        Resender { tabs: Mutex::new(HashMap::new()), storage, upstream, app: Mutex::new(None) }
    }

    /// Wired in once by `lib.rs` after the Tauri app handle exists.
    pub fn attach_app_handle(&self, app: AppHandle) {
        *self.app.lock() = Some(app);
    }

    pub fn create_tab(&self, name: &str) -> ResenderTab {
        let tab = ResenderTab { id: Uuid::now_v7().to_string(), name: name.to_string(), request_ids: Vec::new(), cursor: 0 };
        self.tabs.lock().insert(tab.id.clone(), TabEntry { tab: tab.clone(), in_flight: None });
        tab
    }

    pub fn delete_tab(&self, tab_id: &str) {
        if let Some(entry) = self.tabs.lock().remove(tab_id) {
            if let Some(handle) = entry.in_flight {
                handle.abort();
            }
        }
    }

    pub fn rename_tab(&self, tab_id: &str, new_name: &str) -> ProxyResult<()> {
        let mut tabs = self.tabs.lock();
        let entry = tabs.get_mut(tab_id).ok_or_else(|| ProxyError::Other(format!("unknown tab {tab_id}")))?;
        entry.tab.name = new_name.to_string();
        Ok(())
    }

    pub fn append_request(&self, tab_id: &str, tx_id: Uuid) -> ProxyResult<()> {
        let mut tabs = self.tabs.lock();
        let entry = tabs.get_mut(tab_id).ok_or_else(|| ProxyError::Other(format!("unknown tab {tab_id}")))?;
        entry.tab.request_ids.push(tx_id);
        entry.tab.cursor = entry.tab.request_ids.len() - 1;
        Ok(())
    }

    pub fn list_tabs(&self) -> Vec<ResenderTab> {
        self.tabs.lock().values().map(|e| e.tab.clone()).collect()
    }

    pub fn cancel(&self, tab_id: &str) {
        if let Some(entry) = self.tabs.lock().get_mut(tab_id) {
            if let Some(handle) = entry.in_flight.take() {
                handle.abort();
            }
        }
    }

    /// Spawn a single in-flight send for `tab_id`, aborting any previous
    /// one. Redirects (3xx) are never auto-followed — the UI may resubmit
    /// using `Location` itself.
    pub fn send(self: &Arc<Self>, tab_id: &str, base: Transaction, edits: ResendEdits) -> ProxyResult<()> {
        {
            let mut tabs = self.tabs.lock();
            let entry = tabs.get_mut(tab_id).ok_or_else(|| ProxyError::Other(format!("unknown tab {tab_id}")))?;
            if let Some(handle) = entry.in_flight.take() {
                handle.abort();
            }
        }

        let mut tx = base;
        if let Some(method) = edits.method {
            tx.method = method;
        }
        if let Some(url) = edits.url {
            tx.url = url;
        }
        if let Some(headers) = edits.headers {
            tx.request_headers = headers;
        }
        if let Some(body) = edits.body {
            tx.request_body = body;
        }

        let this = self.clone();
        let tab_id_owned = tab_id.to_string();
        let task = tokio::spawn({
            let tab_id_owned = tab_id_owned.clone();
            async move { this.run_send(tab_id_owned, tx).await }
        });

        let mut tabs = self.tabs.lock();
        if let Some(entry) = tabs.get_mut(&tab_id_owned) {
            entry.in_flight = Some(task.abort_handle());
        }
        Ok(())
    }

    async fn run_send(&self, tab_id: String, mut tx: Transaction) {
        let method = reqwest::Method::from_bytes(tx.method.as_bytes()).unwrap_or(reqwest::Method::GET);
        let mut builder = self.upstream.request(method, &tx.url);
        for (name, value) in tx.request_headers.iter() {
            builder = builder.header(name, value);
        }
        if !tx.request_body.is_empty() {
            builder = builder.body(tx.request_body.clone());
        }

        match builder.send().await {
            Ok(resp) => {
                tx.response_status_line =
                    Some(format!("{} {}", resp.status().as_u16(), resp.status().canonical_reason().unwrap_or("")));
                let mut headers = HeaderMap::new();
                for (name, value) in resp.headers().iter() {
                    headers.push(name.as_str(), value.to_str().unwrap_or_default());
                }
                tx.response_headers = headers;
                tx.response_body = resp.bytes().await.map(|b| b.to_vec()).unwrap_or_default();
                tx.content_length = Some(tx.response_body.len() as u64);
            }
            Err(e) => {
                tx.response_status_line = Some("0 Resend Failed".to_string());
                tx.response_body = format!("resend failed: {e}").into_bytes();
            }
        }

        if self.storage.record_transaction(&tx).is_ok() {
            let _ = self.append_request(&tab_id, tx.id);
            if let Some(entry) = self.tabs.lock().get_mut(&tab_id) {
                entry.in_flight = None;
            }
        }
        if let Some(app) = self.app.lock().as_ref() {
            app.emit("backend:resenderResult", &tx).ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_resender() -> Arc<Resender> {
        let storage = Arc::new(StorageSink::open_in_memory().unwrap());
        Arc::new(Resender::new(storage, reqwest::Client::new()))
    }

    #[test]
    fn create_and_list_tabs() {
        let resender = test_resender();
        let tab = resender.create_tab("scratch");
        let listed = resender.list_tabs();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, tab.id);
    }

    #[test]
    fn rename_unknown_tab_errors() {
        let resender = test_resender();
        assert!(resender.rename_tab("missing", "x").is_err());
    }

    #[test]
    fn append_request_advances_cursor() {
        let resender = test_resender();
        let tab = resender.create_tab("t");
        let id = Uuid::now_v7();
        resender.append_request(&tab.id, id).unwrap();
        let listed = resender.list_tabs();
        assert_eq!(listed[0].cursor, 0);
        assert_eq!(listed[0].request_ids, vec![id]);
    }

    #[test]
    fn delete_tab_removes_it() {
        let resender = test_resender();
        let tab = resender.create_tab("t");
        resender.delete_tab(&tab.id);
        assert!(resender.list_tabs().is_empty());
    }
}
