//! Production gateway client.
//!
//! REST: origin check before the token is ever attached, no redirects,
//! one forced token refresh on 401 then exactly one retry.
//!
//! SSE: per-connection parser, bounded dedup window, `Last-Event-ID`
//! resume, exponential backoff between reconnects. Session streams give up
//! after 12 consecutive failures; device streams retry until cancelled.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use futures_util::StreamExt;
use reqwest::{header, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use async_trait::async_trait;

use ca_proto::envelope::SessionMessageEnvelope;
use ca_proto::handshake::{
    AcceptShareRequest, AcceptShareResponse, ClientInitRequest, DeviceInfo, GrantInfo,
    HandshakeStatusResponse, IdentityKeyResponse, ShareInviteRequest, ShareInviteResponse,
};

use crate::auth::TokenProvider;
use crate::backoff::{next_backoff, BackoffConfig};
use crate::error::GatewayError;
use crate::origin::ensure_trusted;
use crate::relay::{Relay, StreamItem};
use crate::sse::{SseEvent, SseParser};

/// Recent event ids remembered across reconnects.
pub const DEDUP_WINDOW: usize = 200;

/// Consecutive failures tolerated on a per-session stream.
pub const SESSION_STREAM_FAILURE_CAP: u32 = 12;

const LAST_EVENT_ID_HEADER: &str = "Last-Event-ID";

#[derive(Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
    backoff: BackoffConfig,
}

impl GatewayClient {
    pub fn new(
        base_url: impl Into<String>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Self, GatewayError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        ensure_trusted(&base_url)?;
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| GatewayError::Transient(e.to_string()))?;
        Ok(Self {
            http,
            base_url,
            tokens,
            backoff: BackoffConfig::default(),
        })
    }

    fn url(&self, path: &str) -> Result<Url, GatewayError> {
        ensure_trusted(&format!("{}{path}", self.base_url))
    }

    async fn send_once(
        &self,
        method: &Method,
        url: &Url,
        body: Option<&Value>,
        token: &str,
    ) -> Result<Response, GatewayError> {
        let mut req = self
            .http
            .request(method.clone(), url.clone())
            .bearer_auth(token);
        if let Some(body) = body {
            req = req.json(body);
        }
        Ok(req.send().await?)
    }

    /// One authenticated request with the 401 → refresh → retry-once rule.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Response, GatewayError> {
        let url = self.url(path)?;
        let token = self.tokens.access_token().await?;
        let resp = self.send_once(&method, &url, body.as_ref(), &token).await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Self::check_status(resp).await;
        }

        tracing::warn!(
            target: "commands_agent",
            event = "request_unauthorized",
            path = %path,
        );
        let token = self.tokens.force_refresh().await?;
        let retry = self.send_once(&method, &url, body.as_ref(), &token).await?;
        if retry.status() == StatusCode::UNAUTHORIZED {
            return Err(GatewayError::Unauthenticated);
        }
        Self::check_status(retry).await
    }

    async fn check_status(resp: Response) -> Result<Response, GatewayError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(GatewayError::Gone);
        }
        let body = resp.text().await.unwrap_or_default();
        if status.is_server_error() {
            return Err(GatewayError::Transient(format!("{status}: {body}")));
        }
        Err(GatewayError::Api {
            status: status.as_u16(),
            body,
        })
    }

    async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, GatewayError> {
        let resp = self.request(method, path, body).await?;
        Ok(resp.json::<T>().await?)
    }

    // ── SSE ──────────────────────────────────────────────────────────────────

    fn spawn_event_stream(
        &self,
        path: String,
        failure_cap: Option<u32>,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<StreamItem> {
        let (tx, rx) = mpsc::channel(64);
        let client = self.clone();
        tokio::spawn(async move {
            let mut last_event_id: Option<String> = None;
            let mut dedup = DedupWindow::new(DEDUP_WINDOW);
            let mut failures: u32 = 0;
            loop {
                if cancel.is_cancelled() || tx.is_closed() {
                    return;
                }
                let mut delivered = false;
                let outcome = client
                    .stream_once(&path, &mut last_event_id, &mut dedup, &tx, &cancel, &mut delivered)
                    .await;
                if delivered {
                    failures = 0;
                }
                match outcome {
                    Ok(()) => {
                        if cancel.is_cancelled() {
                            return;
                        }
                        // Server closed the stream cleanly; resume shortly.
                    }
                    Err(
                        err @ (GatewayError::Gone
                        | GatewayError::Unauthenticated
                        | GatewayError::EventOverflow(_)),
                    ) => {
                        tracing::warn!(
                            target: "commands_agent",
                            event = "sse_fatal",
                            path = %path,
                            error = %err,
                        );
                        let _ = tx.send(StreamItem::Fatal(err)).await;
                        return;
                    }
                    Err(err) => {
                        failures += 1;
                        tracing::debug!(
                            target: "commands_agent",
                            event = "sse_reconnect",
                            path = %path,
                            failures,
                            error = %err,
                        );
                        if let Some(cap) = failure_cap {
                            if failures >= cap {
                                let _ = tx
                                    .send(StreamItem::Fatal(GatewayError::SubscriptionFailed {
                                        attempts: failures,
                                    }))
                                    .await;
                                return;
                            }
                        }
                    }
                }
                let delay = next_backoff(failures.saturating_sub(1), &client.backoff);
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        });
        rx
    }

    async fn stream_once(
        &self,
        path: &str,
        last_event_id: &mut Option<String>,
        dedup: &mut DedupWindow,
        tx: &mpsc::Sender<StreamItem>,
        cancel: &CancellationToken,
        delivered: &mut bool,
    ) -> Result<(), GatewayError> {
        let url = self.url(path)?;
        let token = self.tokens.access_token().await?;
        let resp = self
            .sse_connect(&url, &token, last_event_id.as_deref())
            .await?;
        let resp = if resp.status() == StatusCode::UNAUTHORIZED {
            let token = self.tokens.force_refresh().await?;
            let retry = self
                .sse_connect(&url, &token, last_event_id.as_deref())
                .await?;
            if retry.status() == StatusCode::UNAUTHORIZED {
                return Err(GatewayError::Unauthenticated);
            }
            retry
        } else {
            resp
        };
        let resp = Self::check_status(resp).await?;

        tracing::debug!(
            target: "commands_agent",
            event = "sse_connected",
            path = %path,
            resume_from = last_event_id.as_deref().unwrap_or(""),
        );

        let mut parser = SseParser::new();
        let mut stream = resp.bytes_stream();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                chunk = stream.next() => match chunk {
                    Some(Ok(bytes)) => {
                        for event in parser.push_chunk(&bytes)? {
                            Self::deliver(event, last_event_id, dedup, tx, delivered).await;
                        }
                    }
                    Some(Err(e)) => return Err(GatewayError::Transient(e.to_string())),
                    None => {
                        for event in parser.finish()? {
                            Self::deliver(event, last_event_id, dedup, tx, delivered).await;
                        }
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn sse_connect(
        &self,
        url: &Url,
        token: &str,
        last_event_id: Option<&str>,
    ) -> Result<Response, GatewayError> {
        let mut req = self
            .http
            .get(url.clone())
            .bearer_auth(token)
            .header(header::ACCEPT, "text/event-stream");
        if let Some(id) = last_event_id {
            req = req.header(LAST_EVENT_ID_HEADER, id);
        }
        Ok(req.send().await?)
    }

    async fn deliver(
        event: SseEvent,
        last_event_id: &mut Option<String>,
        dedup: &mut DedupWindow,
        tx: &mpsc::Sender<StreamItem>,
        delivered: &mut bool,
    ) {
        if let Some(id) = &event.id {
            *last_event_id = Some(id.clone());
            if !dedup.insert(id) {
                return; // replayed across a reconnect
            }
        }
        *delivered = true;
        let _ = tx.send(StreamItem::Event(event)).await;
    }
}

#[async_trait]
impl Relay for GatewayClient {
    async fn client_init(
        &self,
        session_id: &str,
        req: &ClientInitRequest,
    ) -> Result<(), GatewayError> {
        self.request(
            Method::POST,
            &format!("/gateway/v1/sessions/{session_id}/handshake/client-init"),
            Some(serde_json::to_value(req)?),
        )
        .await?;
        Ok(())
    }

    async fn handshake_status(
        &self,
        session_id: &str,
        handshake_id: &str,
    ) -> Result<HandshakeStatusResponse, GatewayError> {
        self.request_json(
            Method::GET,
            &format!("/gateway/v1/sessions/{session_id}/handshake/{handshake_id}"),
            None,
        )
        .await
    }

    async fn identity_key(&self, device_id: &str) -> Result<IdentityKeyResponse, GatewayError> {
        self.request_json(
            Method::GET,
            &format!("/gateway/v1/devices/{device_id}/identity-key"),
            None,
        )
        .await
    }

    async fn list_devices(&self) -> Result<Vec<DeviceInfo>, GatewayError> {
        #[derive(serde::Deserialize)]
        struct DevicesResponse {
            devices: Vec<DeviceInfo>,
        }
        let resp: DevicesResponse = self
            .request_json(Method::GET, "/gateway/v1/devices", None)
            .await?;
        Ok(resp.devices)
    }

    async fn deregister_device(&self, device_id: &str) -> Result<(), GatewayError> {
        self.request(
            Method::DELETE,
            &format!("/gateway/v1/devices/{device_id}"),
            None,
        )
        .await?;
        Ok(())
    }

    async fn post_message(
        &self,
        session_id: &str,
        envelope: &SessionMessageEnvelope,
    ) -> Result<(), GatewayError> {
        self.request(
            Method::POST,
            &format!("/gateway/v1/sessions/{session_id}/messages"),
            Some(serde_json::to_value(envelope)?),
        )
        .await?;
        Ok(())
    }

    async fn subscribe_session_events(
        &self,
        session_id: &str,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<StreamItem>, GatewayError> {
        let path = format!("/gateway/v1/sessions/{session_id}/events");
        self.url(&path)?;
        Ok(self.spawn_event_stream(path, Some(SESSION_STREAM_FAILURE_CAP), cancel))
    }

    async fn subscribe_device_events(
        &self,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<StreamItem>, GatewayError> {
        let path = "/gateway/v1/devices/events".to_string();
        self.url(&path)?;
        Ok(self.spawn_event_stream(path, None, cancel))
    }

    async fn create_share_invite(
        &self,
        device_id: &str,
    ) -> Result<ShareInviteResponse, GatewayError> {
        self.request_json(
            Method::POST,
            "/api/gateway/shares/invites",
            Some(serde_json::to_value(ShareInviteRequest {
                device_id: device_id.to_string(),
            })?),
        )
        .await
    }

    async fn accept_share_invite(&self, token: &str) -> Result<AcceptShareResponse, GatewayError> {
        self.request_json(
            Method::POST,
            "/api/gateway/shares/invites/accept",
            Some(serde_json::to_value(AcceptShareRequest {
                token: token.to_string(),
            })?),
        )
        .await
    }

    async fn list_grants(&self, device_id: &str) -> Result<Vec<GrantInfo>, GatewayError> {
        #[derive(serde::Deserialize)]
        struct GrantsResponse {
            grants: Vec<GrantInfo>,
        }
        let resp: GrantsResponse = self
            .request_json(
                Method::GET,
                &format!("/api/gateway/shares/devices/{device_id}/grants"),
                None,
            )
            .await?;
        Ok(resp.grants)
    }

    async fn revoke_grant(&self, grant_id: &str) -> Result<(), GatewayError> {
        self.request(
            Method::POST,
            &format!("/api/gateway/shares/grants/{grant_id}/revoke"),
            None,
        )
        .await?;
        Ok(())
    }
}

// ── Event-id dedup window ────────────────────────────────────────────────────

/// Bounded FIFO set of recently seen event ids.
pub struct DedupWindow {
    order: VecDeque<String>,
    seen: HashSet<String>,
    cap: usize,
}

impl DedupWindow {
    pub fn new(cap: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(cap),
            seen: HashSet::with_capacity(cap),
            cap,
        }
    }

    /// Returns false if the id was already in the window.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        if self.order.len() == self.cap {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.seen.insert(id.to_string());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenProvider;

    #[test]
    fn dedup_discards_repeats() {
        let mut w = DedupWindow::new(3);
        assert!(w.insert("a"));
        assert!(!w.insert("a"));
        assert!(w.insert("b"));
        assert!(!w.insert("b"));
    }

    #[test]
    fn dedup_evicts_oldest_first() {
        let mut w = DedupWindow::new(2);
        assert!(w.insert("a"));
        assert!(w.insert("b"));
        assert!(w.insert("c")); // evicts a
        assert!(w.insert("a"));
        assert!(!w.insert("c"));
    }

    #[test]
    fn client_rejects_untrusted_base_url() {
        let tokens = Arc::new(StaticTokenProvider::new("t"));
        assert!(GatewayClient::new("https://evil.example.com", tokens.clone()).is_err());
        assert!(GatewayClient::new("http://api.commands.com", tokens.clone()).is_err());
        assert!(GatewayClient::new("https://api.commands.com", tokens.clone()).is_ok());
        assert!(GatewayClient::new("http://127.0.0.1:8787", tokens).is_ok());
    }
}
