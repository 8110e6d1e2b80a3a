// Fuzzer (spec §4.10).
//
// Expands a template + payload sources into a Cartesian product, iterated by
// a bounded worker pool. Grounded on the teacher's `engine/state.rs`
// `run_semaphore: Semaphore` pattern for capping concurrent work.

use crate::atoms::constants::{FUZZER_DEFAULT_WORKERS, FUZZER_PROGRESS_EVERY, FUZZER_REQUEST_TIMEOUT_SECS};
use crate::atoms::error::{ProxyError, ProxyResult};
use crate::atoms::types::{FuzzerResult, FuzzerTab, PayloadSource};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tauri::{AppHandle, Emitter};
use tokio::sync::Semaphore;
use tokio::time::{timeout, Duration};

struct RunState {
    cancel: Arc<AtomicBool>,
    completed: Arc<AtomicU64>,
}

pub struct Fuzzer {
    tabs: Mutex<HashMap<String, FuzzerTab>>,
    runs: Mutex<HashMap<String, RunState>>,
    upstream: reqwest::Client,
    app: Mutex<Option<AppHandle>>,
}

impl Fuzzer {
    pub fn new(upstream: reqwest::Client) -> Self {
        Fuzzer { tabs: Mutex::new(HashMap::new()), runs: Mutex::new(HashMap::new()), upstream, app: Mutex::new(None) }
    }

    pub fn attach_app_handle(&self, app: AppHandle) {
        *self.app.lock() = Some(app);
    }

    pub fn create_tab(&self, tab: FuzzerTab) {
        self.tabs.lock().insert(tab.id.clone(), tab);
    }

    pub fn update_tab(&self, tab: FuzzerTab) -> ProxyResult<()> {
        let mut tabs = self.tabs.lock();
        if !tabs.contains_key(&tab.id) {
            return Err(ProxyError::Other(format!("unknown fuzzer tab {}", tab.id)));
        }
        tabs.insert(tab.id.clone(), tab);
        Ok(())
    }

    pub fn delete_tab(&self, tab_id: &str) {
        self.tabs.lock().remove(tab_id);
        self.stop(tab_id);
    }

    pub fn list_tabs(&self) -> Vec<FuzzerTab> {
        self.tabs.lock().values().cloned().collect()
    }

    pub fn stop(&self, tab_id: &str) {
        if let Some(run) = self.runs.lock().remove(tab_id) {
            run.cancel.store(true, Ordering::SeqCst);
        }
    }

    pub fn start(self: &Arc<Self>, tab_id: &str, workers: usize) -> ProxyResult<()> {
        let tab = self.tabs.lock().get(tab_id).cloned().ok_or_else(|| ProxyError::Other(format!("unknown fuzzer tab {tab_id}")))?;

        let cancel = Arc::new(AtomicBool::new(false));
        let completed = Arc::new(AtomicU64::new(0));
        self.runs.lock().insert(tab_id.to_string(), RunState { cancel: cancel.clone(), completed: completed.clone() });

        let this = self.clone();
        let tab_id = tab_id.to_string();
        let workers = if workers == 0 { FUZZER_DEFAULT_WORKERS } else { workers };
        tokio::spawn(async move { this.run(tab, tab_id, workers, cancel, completed).await });
        Ok(())
    }

    async fn run(&self, tab: FuzzerTab, tab_id: String, workers: usize, cancel: Arc<AtomicBool>, completed: Arc<AtomicU64>) {
        let tuples = expand_cartesian(&tab.payload_sources);
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut handles = Vec::with_capacity(tuples.len());

        for tuple in tuples {
            if cancel.load(Ordering::SeqCst) {
                break;
            }
            let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
            let upstream = self.upstream.clone();
            let tab = tab.clone();
            let cancel = cancel.clone();
            let completed = completed.clone();
            let app = self.app.lock().clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                if cancel.load(Ordering::SeqCst) {
                    return;
                }
                let result = execute_iteration(&upstream, &tab, &tuple).await;
                let n = completed.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(app) = app {
                    if n % FUZZER_PROGRESS_EVERY == 0 {
                        app.emit("backend:fuzzerProgress", &(tab.id.clone(), n)).ok();
                    }
                    app.emit("backend:fuzzerResult", &result).ok();
                }
            }));
        }

        for h in handles {
            h.await.ok();
        }
        self.runs.lock().remove(&tab_id);
    }
}

fn expand_cartesian(sources: &[PayloadSource]) -> Vec<Vec<String>> {
    let lists: Vec<Vec<String>> = sources
        .iter()
        .map(|s| match s {
            PayloadSource::Sequence { from, to, step } => {
                let step = if *step == 0 { 1 } else { *step };
                let mut v = Vec::new();
                let mut n = *from;
                if step > 0 {
                    while n <= *to {
                        v.push(n.to_string());
                        n += step;
                    }
                } else {
                    while n >= *to {
                        v.push(n.to_string());
                        n += step;
                    }
                }
                v
            }
            PayloadSource::List(items) => items.clone(),
        })
        .collect();

    if lists.is_empty() {
        return Vec::new();
    }
    lists.into_iter().fold(vec![Vec::new()], |acc, list| {
        acc.into_iter()
            .flat_map(|prefix| {
                list.iter().map(move |v| {
                    let mut next = prefix.clone();
                    next.push(v.clone());
                    next
                })
            })
            .collect()
    })
}

fn substitute_placeholders(template: &str, tuple: &[String]) -> String {
    let mut out = template.to_string();
    for (i, value) in tuple.iter().enumerate() {
        out = out.replace(&format!("[__Inject-Here__[{i}]]"), value);
    }
    out
}

async fn execute_iteration(upstream: &reqwest::Client, tab: &FuzzerTab, tuple: &[String]) -> FuzzerResult {
    let url = substitute_placeholders(&format!("{}{}", tab.base_url, tab.path), tuple);
    let body = substitute_placeholders(&tab.body_template, tuple);
    let method = reqwest::Method::from_bytes(tab.method.as_bytes()).unwrap_or(reqwest::Method::GET);

    let mut builder = upstream.request(method, &url);
    for (name, value) in tab.headers.iter() {
        builder = builder.header(name, substitute_placeholders(value, tuple));
    }
    if !body.is_empty() {
        builder = builder.body(body);
    }

    match timeout(Duration::from_secs(FUZZER_REQUEST_TIMEOUT_SECS), builder.send()).await {
        Ok(Ok(resp)) => {
            let status = resp.status().as_u16();
            let reason = resp.status().canonical_reason().unwrap_or("").to_string();
            let content_type = resp.headers().get("content-type").and_then(|v| v.to_str().ok()).map(str::to_string);
            let mut headers = HashMap::new();
            for (name, value) in resp.headers().iter() {
                headers.insert(name.as_str().to_string(), value.to_str().unwrap_or_default().to_string());
            }
            let body = resp.bytes().await.map(|b| b.to_vec()).unwrap_or_default();
            FuzzerResult {
                payload_tuple: tuple.to_vec(),
                status,
                length: body.len() as u64,
                content_type,
                response_headers: headers,
                body,
                raw_status_line: format!("{status} {reason}"),
                error: None,
            }
        }
        Ok(Err(e)) => fuzzer_error_result(tuple, e.to_string()),
        Err(_) => fuzzer_error_result(tuple, "request timed out".to_string()),
    }
}

fn fuzzer_error_result(tuple: &[String], error: String) -> FuzzerResult {
    FuzzerResult {
        payload_tuple: tuple.to_vec(),
        status: 0,
        length: 0,
        content_type: None,
        response_headers: HashMap::new(),
        body: Vec::new(),
        raw_status_line: String::new(),
        error: Some(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cartesian_expands_sequence_and_list_sources() {
        let sources = vec![
            PayloadSource::Sequence { from: 1, to: 2, step: 1 },
            PayloadSource::List(vec!["a".into(), "b".into()]),
        ];
        let tuples = expand_cartesian(&sources);
        assert_eq!(tuples.len(), 4);
        assert!(tuples.contains(&vec!["1".to_string(), "a".to_string()]));
        assert!(tuples.contains(&vec!["2".to_string(), "b".to_string()]));
    }

    #[test]
    fn empty_sources_yield_no_tuples() {
        assert!(expand_cartesian(&[]).is_empty());
    }

    #[test]
    fn substitute_placeholders_replaces_by_index() {
        let out = substitute_placeholders("id=[__Inject-Here__[0]]&name=[__Inject-Here__[1]]", &["7".into(), "bob".into()]);
        assert_eq!(out, "id=7&name=bob");
    }

    #[test]
    fn descending_sequence_steps_down() {
        let sources = vec![PayloadSource::Sequence { from: 3, to: 1, step: -1 }];
        let tuples = expand_cartesian(&sources);
        assert_eq!(tuples, vec![vec!["3".to_string()], vec!["2".to_string()], vec!["1".to_string()]]);
    }
}
