// HTTP(S) Pipeline (spec §4.6).
//
// Accepts client sockets, demultiplexes CONNECT vs direct requests, splices
// TLS via a freshly minted leaf certificate, and drives the per-transaction
// state machine. Raw request parsing over `tokio::net::TcpListener`, no
// framework — grounded on the teacher's `engine/webhook.rs` accept loop
// (bounded-timeout accept so the loop can observe the cancellation flag).

use crate::atoms::constants::{
    MAX_REQUEST_HEAD_BYTES, RESPONSE_BODY_CAP_BYTES, RESPONSE_STREAM_CHUNK_BYTES, UI_ORIGIN_HOSTS,
    UPSTREAM_TIMEOUT_SECS,
};
use crate::atoms::types::{ApprovalResponse, DropReason, HeaderMap, Transaction};
use crate::engine::gate::GateDecision;
use crate::engine::rules::RuleContext;
use crate::engine::state::Environment;
use futures::StreamExt;
use log::{debug, warn};
use rustls::pki_types::CertificateDer;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};
use tokio_rustls::TlsAcceptor;
use tracing::Instrument;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(0);

/// Accept loop. Runs until `env.cancel` is set.
pub async fn run_listener(env: Arc<Environment>, bind_addr: String) -> io::Result<()> {
    let listener = TcpListener::bind(&bind_addr).await?;
    log::info!("[pipeline] listening on {bind_addr}");
    loop {
        if env.cancel.load(Ordering::Relaxed) {
            break;
        }
        let accepted = timeout(Duration::from_secs(1), listener.accept()).await;
        let (socket, peer) = match accepted {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                warn!("[pipeline] accept error: {e}");
                continue;
            }
            Err(_) => continue, // timeout tick, re-check cancel
        };
        let env = env.clone();
        let connection_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        let span = tracing::info_span!("connection", connection_id, %peer);
        tokio::spawn(
            async move {
                if let Err(e) = handle_connection(env, socket).await {
                    debug!("[pipeline] connection from {peer} ended: {e}");
                }
            }
            .instrument(span),
        );
    }
    Ok(())
}

async fn handle_connection(env: Arc<Environment>, mut socket: TcpStream) -> io::Result<()> {
    let (head, leftover) = match read_head(&mut socket).await? {
        Some(v) => v,
        None => return Ok(()), // peer closed before sending anything
    };
    let (method, target, protocol) = match parse_request_line(&head) {
        Some(v) => v,
        None => {
            write_raw_error(&mut socket, 400, "Bad Request").await?;
            return Ok(());
        }
    };

    if method.eq_ignore_ascii_case("CONNECT") {
        handle_connect(env, socket, &target).await
    } else {
        let headers = parse_headers(&head);
        let body = read_body(&mut socket, &headers, leftover).await?;
        serve_plain_request(&env, &mut socket, &method, &target, &protocol, headers, body).await
    }
}

/// CONNECT tunnel: 200 back to the client, then splice TLS with a minted
/// leaf for the tunnel authority, then loop plaintext requests inside it.
async fn handle_connect(env: Arc<Environment>, mut socket: TcpStream, authority: &str) -> io::Result<()> {
    let host = authority.split(':').next().unwrap_or(authority).to_string();

    let leaf = match env.cert_mint.leaf_for(&host) {
        Ok(leaf) => leaf,
        Err(e) => {
            warn!("[pipeline] cert mint failed for {host}: {e}");
            write_tls_alert(&mut socket).await.ok();
            socket.shutdown().await.ok();
            return Ok(());
        }
    };

    socket.write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n").await?;

    let acceptor = match build_acceptor(leaf) {
        Ok(a) => a,
        Err(e) => {
            warn!("[pipeline] TLS config build failed for {host}: {e}");
            return Ok(());
        }
    };
    let mut tls = match acceptor.accept(socket).await {
        Ok(tls) => tls,
        Err(e) => {
            warn!("[pipeline] TLS handshake with client failed for {host}: {e}");
            return Ok(());
        }
    };

    loop {
        let (head, leftover) = match read_head(&mut tls).await? {
            Some(v) => v,
            None => return Ok(()), // client closed the tunnel
        };
        let (method, target, protocol) = match parse_request_line(&head) {
            Some(v) => v,
            None => {
                write_raw_error(&mut tls, 400, "Bad Request").await?;
                return Ok(());
            }
        };
        let headers = parse_headers(&head);
        let body = read_body(&mut tls, &headers, leftover).await?;
        let url = format!("https://{authority}{target}");
        serve_request(&env, &mut tls, &method, &url, &protocol, &host, headers, body).await?;
    }
}

async fn serve_plain_request<S: tokio::io::AsyncWrite + Unpin>(
    env: &Arc<Environment>,
    socket: &mut S,
    method: &str,
    target: &str,
    protocol: &str,
    headers: HeaderMap,
    body: Vec<u8>,
) -> io::Result<()> {
    // Absolute-URI required for plain forward-proxy requests (RFC 7230).
    let domain = url::Url::parse(target)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default();
    serve_request(env, socket, method, target, protocol, &domain, headers, body).await
}

/// Steps 1-10 of the per-request pipeline.
async fn serve_request<S: tokio::io::AsyncWrite + Unpin>(
    env: &Arc<Environment>,
    socket: &mut S,
    method: &str,
    url: &str,
    protocol: &str,
    domain: &str,
    headers: HeaderMap,
    body: Vec<u8>,
) -> io::Result<()> {
    // Step 1: build the transaction.
    let mut tx = Transaction::new(method, url, protocol);
    tracing::info!(transaction_id = %tx.id, host = domain, method, "dispatching request");
    tx.request_headers = headers;
    tx.request_body = body;

    // Step 2: loopback UI origins bypass everything.
    if UI_ORIGIN_HOSTS.iter().any(|h| h.eq_ignore_ascii_case(domain)) {
        return forward_and_respond(env, socket, tx).await;
    }

    // Step 3: scope.
    let in_scope = env.scope.is_in_scope(&tx.url);

    // Step 4 + 5: rule evaluation, gate suspension.
    let should_intercept = in_scope
        && env.interception_enabled.load(Ordering::Relaxed)
        && env.rules.evaluate(&RuleContext {
            domain,
            url: &tx.url,
            method: &tx.method,
            path: &tx.path,
            request_headers: &tx.request_headers,
            request_body: &tx.request_body,
            response_status: None,
            response_body: None,
        });

    if should_intercept {
        match env.gate.suspend(tx.id).await {
            GateDecision::Approved(edits) => apply_edits(&mut tx, edits),
            GateDecision::Dropped(reason) => {
                tx.drop_reason = Some(reason);
                return synth_drop_response(env, socket, tx).await;
            }
        }
    }

    // Step 6: request-side match/replace.
    env.match_replace.apply_request(&mut tx);

    forward_and_respond(env, socket, tx).await
}

fn apply_edits(tx: &mut Transaction, edits: ApprovalResponse) {
    // An empty url marks the "toggle interception off" auto-approve path —
    // keep the transaction's original captured content untouched.
    if edits.url.is_empty() {
        return;
    }
    tx.method = edits.method;
    tx.protocol = edits.protocol;
    tx.url = edits.url;
    tx.request_headers = edits.headers;
    tx.request_body = edits.body;
}

async fn synth_drop_response<S: tokio::io::AsyncWrite + Unpin>(
    env: &Arc<Environment>,
    socket: &mut S,
    tx: Transaction,
) -> io::Result<()> {
    let body = b"Request dropped";
    write_raw_response(socket, 403, "Forbidden", &HeaderMap::new(), body).await?;
    let mut tx = tx;
    tx.response_status_line = Some("403 Forbidden".to_string());
    tx.response_body = body.to_vec();
    env.sink.publish(tx);
    Ok(())
}

/// Steps 7-10: upstream round-trip, response-side match/replace, publish,
/// write back to the client.
async fn forward_and_respond<S: tokio::io::AsyncWrite + Unpin>(
    env: &Arc<Environment>,
    socket: &mut S,
    mut tx: Transaction,
) -> io::Result<()> {
    let outcome = timeout(Duration::from_secs(UPSTREAM_TIMEOUT_SECS), do_upstream(env, &tx)).await;

    match outcome {
        Ok(Ok((status, reason, headers, body, truncated))) => {
            tx.response_status_line = Some(format!("{status} {reason}"));
            tx.response_headers = headers;
            tx.response_body = body;
            tx.truncated = truncated;
            tx.mime_type = tx.response_headers.get("Content-Type").map(|s| s.to_string());

            env.match_replace.apply_response(&mut tx);
            tx.content_length = Some(tx.response_body.len() as u64);

            write_raw_response(socket, status, &reason, &tx.response_headers, &tx.response_body).await?;
            env.sink.publish(tx);
            Ok(())
        }
        Ok(Err(e)) => {
            warn!("[pipeline] upstream error for {}: {e}", tx.url);
            tx.response_status_line = Some("502 Bad Gateway".to_string());
            tx.response_body = format!("Upstream error: {e}").into_bytes();
            write_raw_response(socket, 502, "Bad Gateway", &HeaderMap::new(), &tx.response_body).await?;
            env.sink.publish(tx);
            Ok(())
        }
        Err(_) => {
            tx.response_status_line = Some("504 Gateway Timeout".to_string());
            tx.response_body = b"Upstream request timed out".to_vec();
            write_raw_response(socket, 504, "Gateway Timeout", &HeaderMap::new(), &tx.response_body).await?;
            env.sink.publish(tx);
            Ok(())
        }
    }
}

type UpstreamResult = (u16, String, HeaderMap, Vec<u8>, bool);

async fn do_upstream(env: &Arc<Environment>, tx: &Transaction) -> Result<UpstreamResult, reqwest::Error> {
    let method = reqwest::Method::from_bytes(tx.method.as_bytes()).unwrap_or(reqwest::Method::GET);
    let mut builder = env.upstream.request(method, &tx.url);
    for (name, value) in tx.request_headers.iter() {
        // Host/Content-Length are reconstructed by reqwest/hyper from the URL and body.
        if name.eq_ignore_ascii_case("host") || name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        builder = builder.header(name, value);
    }
    if !tx.request_body.is_empty() {
        builder = builder.body(tx.request_body.clone());
    }

    let resp = builder.send().await?;
    let status = resp.status().as_u16();
    let reason = resp.status().canonical_reason().unwrap_or("").to_string();

    let mut headers = HeaderMap::new();
    for (name, value) in resp.headers().iter() {
        headers.push(name.as_str(), value.to_str().unwrap_or_default());
    }

    // Pull the body off the wire in network-sized chunks rather than
    // buffering it whole, so a response far past the cap never sits in
    // memory at full size; stop copying into `body` once the cap is hit
    // but keep draining the stream so the connection closes cleanly.
    let mut body = Vec::with_capacity(RESPONSE_STREAM_CHUNK_BYTES.min(RESPONSE_BODY_CAP_BYTES));
    let mut truncated = false;
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        let remaining = RESPONSE_BODY_CAP_BYTES.saturating_sub(body.len());
        if remaining == 0 {
            truncated = true;
            continue;
        }
        let take = chunk.len().min(remaining);
        body.extend_from_slice(&chunk[..take]);
        if take < chunk.len() {
            truncated = true;
        }
    }

    Ok((status, reason, headers, body, truncated))
}

// ── Raw HTTP parsing helpers ────────────────────────────────────────────

async fn read_head<S: tokio::io::AsyncRead + Unpin>(stream: &mut S) -> io::Result<Option<(String, Vec<u8>)>> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return if buf.is_empty() { Ok(None) } else { Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated head")) };
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > MAX_REQUEST_HEAD_BYTES {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "request head too large"));
        }
        if let Some(pos) = find_subslice(&buf, b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..pos]).into_owned();
            let leftover = buf[pos + 4..].to_vec();
            return Ok(Some((head, leftover)));
        }
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn parse_request_line(head: &str) -> Option<(String, String, String)> {
    let line = head.lines().next()?;
    let mut parts = line.split_whitespace();
    let method = parts.next()?.to_string();
    let target = parts.next()?.to_string();
    let protocol = parts.next().unwrap_or("HTTP/1.1").to_string();
    Some((method, target, protocol))
}

fn parse_headers(head: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for line in head.lines().skip(1) {
        if let Some((name, value)) = line.split_once(':') {
            headers.push(name.trim(), value.trim());
        }
    }
    headers
}

async fn read_body<S: tokio::io::AsyncRead + Unpin>(
    stream: &mut S,
    headers: &HeaderMap,
    mut leftover: Vec<u8>,
) -> io::Result<Vec<u8>> {
    let content_length: usize = headers.get("Content-Length").and_then(|v| v.parse().ok()).unwrap_or(0);
    if content_length == 0 {
        return Ok(Vec::new());
    }
    while leftover.len() < content_length {
        let mut chunk = vec![0u8; content_length - leftover.len()];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        leftover.extend_from_slice(&chunk[..n]);
    }
    leftover.truncate(content_length);
    Ok(leftover)
}

async fn write_raw_response<S: tokio::io::AsyncWrite + Unpin>(
    socket: &mut S,
    status: u16,
    reason: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> io::Result<()> {
    let mut out = format!("HTTP/1.1 {status} {reason}\r\n");
    let mut wrote_length = false;
    for (name, value) in headers.iter() {
        if name.eq_ignore_ascii_case("content-length") {
            wrote_length = true;
        }
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    if !wrote_length {
        out.push_str(&format!("Content-Length: {}\r\n", body.len()));
    }
    out.push_str("\r\n");
    socket.write_all(out.as_bytes()).await?;
    socket.write_all(body).await?;
    Ok(())
}

async fn write_raw_error<S: tokio::io::AsyncWrite + Unpin>(socket: &mut S, status: u16, reason: &str) -> io::Result<()> {
    write_raw_response(socket, status, reason, &HeaderMap::new(), reason.as_bytes()).await
}

/// A fatal `internal_error` TLS alert record, sent in the clear. No keys
/// have been negotiated at this point (the client hasn't even started its
/// handshake yet — minting happens before the `200 Connection Established`
/// reply), so an unencrypted alert record is exactly what a real TLS stack
/// sends when it aborts before completing a handshake.
async fn write_tls_alert<S: tokio::io::AsyncWrite + Unpin>(socket: &mut S) -> io::Result<()> {
    const ALERT_RECORD: [u8; 7] = [
        0x15, // content type: alert
        0x03, 0x03, // legacy record version: TLS 1.2
        0x00, 0x02, // record length
        0x02, // alert level: fatal
        0x50, // alert description: internal_error (80)
    ];
    socket.write_all(&ALERT_RECORD).await
}

// ── TLS splicing ────────────────────────────────────────────────────────

struct SingleCertResolver(Arc<CertifiedKey>);

impl ResolvesServerCert for SingleCertResolver {
    fn resolve(&self, _client_hello: ClientHello) -> Option<Arc<CertifiedKey>> {
        Some(self.0.clone())
    }
}

fn build_acceptor(leaf: crate::engine::ca::LeafCert) -> io::Result<TlsAcceptor> {
    let cert_der = rustls_pemfile::certs(&mut leaf.cert_pem.as_bytes())
        .collect::<Result<Vec<CertificateDer<'static>>, _>>()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let key_der = rustls_pemfile::private_key(&mut leaf.key_pem.as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "no private key in leaf PEM"))?;

    let signing_key = rustls::crypto::ring::sign::any_supported_type(&key_der)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    let certified = Arc::new(CertifiedKey::new(cert_der, signing_key));

    let mut config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(SingleCertResolver(certified)));
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(TlsAcceptor::from(Arc::new(config)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_request_line_splits_method_target_protocol() {
        let (m, t, p) = parse_request_line("GET http://example.test/ HTTP/1.1").unwrap();
        assert_eq!(m, "GET");
        assert_eq!(t, "http://example.test/");
        assert_eq!(p, "HTTP/1.1");
    }

    #[test]
    fn parse_request_line_rejects_empty() {
        assert!(parse_request_line("").is_none());
    }

    #[test]
    fn parse_headers_collects_all_lines() {
        let head = "GET / HTTP/1.1\r\nHost: example.test\r\nX-Test: a\r\nX-Test: b";
        let headers = parse_headers(head);
        assert_eq!(headers.get("Host"), Some("example.test"));
        assert_eq!(headers.get_all("X-Test"), vec!["a", "b"]);
    }

    #[test]
    fn find_subslice_locates_terminator() {
        let buf = b"GET / HTTP/1.1\r\n\r\nbody";
        assert_eq!(find_subslice(buf, b"\r\n\r\n"), Some(14));
    }

    #[tokio::test]
    async fn write_tls_alert_emits_a_fatal_internal_error_record() {
        let mut buf: Vec<u8> = Vec::new();
        write_tls_alert(&mut buf).await.unwrap();
        assert_eq!(buf, [0x15, 0x03, 0x03, 0x00, 0x02, 0x02, 0x50]);
    }
}
