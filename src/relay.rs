//! Outbound HTTP relay of events to the CRM

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::{
    constants::DEFAULT_RELAY_TIMEOUT_MS,
    dispatch::{BoxFuture, EventHandler, HandlerResult},
    packet::Packet,
};

/// Delivers one event payload to a URL.
///
/// Implementations bound their own run time and never fail loudly: the
/// return value only says whether delivery succeeded.
pub trait Notifier: Send + Sync + 'static {
    fn notify<'a>(&'a self, url: &'a str, payload: &'a Packet) -> BoxFuture<'a, bool>;
}

/// Best-effort JSON POST with a per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpRelay {
    client: reqwest::Client,
    timeout: Duration,
}

impl Default for HttpRelay {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_RELAY_TIMEOUT_MS))
    }
}

impl HttpRelay {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// POST `payload` as a JSON object of its fields.
    pub async fn post(&self, url: &str, payload: &Packet) -> bool {
        let response = self
            .client
            .post(url)
            .json(payload)
            .timeout(self.timeout)
            .send()
            .await;

        match response {
            Ok(r) if r
                .status()
                .is_success() =>
            {
                debug!("Relayed {:?} to {}", payload.event(), url);
                true
            }
            Ok(r) => {
                warn!("Relay to {} failed: HTTP {}", url, r.status());
                false
            }
            Err(e) if e.is_timeout() => {
                warn!(
                    "Relay to {} timed out after {}ms",
                    url,
                    self.timeout
                        .as_millis()
                );
                false
            }
            Err(e) => {
                warn!("Relay to {} failed: {}", url, e);
                false
            }
        }
    }
}

impl Notifier for HttpRelay {
    fn notify<'a>(&'a self, url: &'a str, payload: &'a Packet) -> BoxFuture<'a, bool> {
        Box::pin(self.post(url, payload))
    }
}

/// Registry handler forwarding each event it receives to one URL.
pub struct RelayHandler<N: Notifier = HttpRelay> {
    notifier: Arc<N>,
    url: Arc<str>,
}

impl<N: Notifier> RelayHandler<N> {
    pub fn new(notifier: Arc<N>, url: impl Into<String>) -> Self {
        Self {
            notifier,
            url: Arc::from(url.into()),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl<N: Notifier> EventHandler for RelayHandler<N> {
    fn handle(&self, event: &Packet) -> BoxFuture<'static, HandlerResult> {
        let notifier = self
            .notifier
            .clone();
        let url = self
            .url
            .clone();
        let event = event.clone();
        Box::pin(async move {
            notifier
                .notify(&url, &event)
                .await;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::HandlerRegistry;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn hangup() -> Packet {
        Packet::from_iter([
            ("Event", "Hangup"),
            ("Channel", "SIP/8001-1"),
            ("Cause", "16"),
        ])
    }

    /// Accept one HTTP request, reply with `status`, return the body.
    async fn serve_once(listener: TcpListener, status: &'static str) -> String {
        let (mut sock, _) = listener
            .accept()
            .await
            .unwrap();
        let mut data = Vec::new();
        let mut buf = [0u8; 1024];
        let body_start = loop {
            let n = sock
                .read(&mut buf)
                .await
                .unwrap();
            data.extend_from_slice(&buf[..n]);
            if let Some(pos) = data
                .windows(4)
                .position(|w| w == b"\r\n\r\n")
            {
                break pos + 4;
            }
        };
        let head = String::from_utf8_lossy(&data[..body_start]).to_lowercase();
        let length: usize = head
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .map(|v| v.trim().parse().unwrap())
            .unwrap_or(0);
        while data.len() < body_start + length {
            let n = sock
                .read(&mut buf)
                .await
                .unwrap();
            data.extend_from_slice(&buf[..n]);
        }
        sock.write_all(format!("HTTP/1.1 {}\r\nContent-Length: 0\r\n\r\n", status).as_bytes())
            .await
            .unwrap();
        String::from_utf8_lossy(&data[body_start..body_start + length]).into_owned()
    }

    #[tokio::test]
    async fn test_post_sends_json_fields() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap();
        let url = format!("http://{}/ami", listener.local_addr().unwrap());
        let server = tokio::spawn(serve_once(listener, "200 OK"));

        let relay = HttpRelay::default();
        assert!(relay.post(&url, &hangup()).await);

        let body: serde_json::Value = serde_json::from_str(&server.await.unwrap()).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"Event": "Hangup", "Channel": "SIP/8001-1", "Cause": "16"})
        );
    }

    #[tokio::test]
    async fn test_post_non_success_status_is_false() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap();
        let url = format!("http://{}/ami", listener.local_addr().unwrap());
        let server = tokio::spawn(serve_once(listener, "500 Internal Server Error"));

        assert!(!HttpRelay::default().post(&url, &hangup()).await);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_post_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap();
        let url = format!("http://{}/ami", listener.local_addr().unwrap());
        // Accept and never answer
        let _server = tokio::spawn(async move {
            let (_sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let relay = HttpRelay::new(Duration::from_millis(200));
        let started = std::time::Instant::now();
        assert!(!relay.post(&url, &hangup()).await);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_post_unreachable_is_false() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap();
        let url = format!("http://{}/ami", listener.local_addr().unwrap());
        drop(listener);

        assert!(!HttpRelay::default().post(&url, &hangup()).await);
    }

    #[derive(Default)]
    struct RecordingNotifier {
        calls: Mutex<Vec<(String, Packet)>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify<'a>(&'a self, url: &'a str, payload: &'a Packet) -> BoxFuture<'a, bool> {
            self.calls
                .lock()
                .unwrap()
                .push((url.to_string(), payload.clone()));
            Box::pin(async { false })
        }
    }

    #[tokio::test]
    async fn test_relay_handler_forwards_and_never_fails() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut registry = HandlerRegistry::new();
        registry.register_handler(
            "Hangup",
            RelayHandler::new(notifier.clone(), "http://crm.example/ami"),
        );

        let report = registry
            .dispatch(&hangup())
            .await;
        assert_eq!(report.failed, 0);

        let calls = notifier
            .calls
            .lock()
            .unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "http://crm.example/ami");
        assert_eq!(calls[0].1, hangup());
    }
}
