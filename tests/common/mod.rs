//! Scripted in-process AMI server for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;

pub const GREETING: &str = "Asterisk Call Manager/5.0.0\r\n";

pub type Fields = HashMap<String, String>;

/// Bind an ephemeral port on localhost.
pub async fn bind() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap();
    let port = listener
        .local_addr()
        .unwrap()
        .port();
    (listener, port)
}

/// A port with nothing listening on it.
pub async fn closed_port() -> u16 {
    let (listener, port) = bind().await;
    drop(listener);
    port
}

/// Server side of one AMI connection.
pub struct AmiPeer {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl AmiPeer {
    /// Accept a connection and send the greeting.
    pub async fn accept(listener: &TcpListener) -> Self {
        let (socket, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
            .await
            .expect("no client connected")
            .unwrap();
        let (read, write) = socket.into_split();
        let mut peer = Self {
            reader: BufReader::new(read),
            writer: write,
        };
        peer.send_raw(GREETING)
            .await;
        peer
    }

    /// Read one action packet; `None` once the client has closed.
    pub async fn read_action(&mut self) -> Option<Fields> {
        let mut fields = Fields::new();
        loop {
            let mut line = String::new();
            let n = self
                .reader
                .read_line(&mut line)
                .await
                .ok()?;
            if n == 0 {
                return None;
            }
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                if fields.is_empty() {
                    continue;
                }
                return Some(fields);
            }
            if let Some((key, value)) = line.split_once(':') {
                fields.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
    }

    /// Read an action and check its name.
    pub async fn expect_action(&mut self, name: &str) -> Fields {
        let action = tokio::time::timeout(Duration::from_secs(5), self.read_action())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {}", name))
            .unwrap_or_else(|| panic!("client closed before sending {}", name));
        assert_eq!(action.get("Action").map(String::as_str), Some(name), "{:?}", action);
        action
    }

    /// Reply to `action`, echoing its ActionID.
    pub async fn reply(&mut self, action: &Fields, fields: &[(&str, &str)]) {
        let mut packet = String::new();
        for (key, value) in fields {
            packet.push_str(&format!("{}: {}\r\n", key, value));
        }
        if let Some(id) = action.get("ActionID") {
            packet.push_str(&format!("ActionID: {}\r\n", id));
        }
        packet.push_str("\r\n");
        self.send_raw(&packet)
            .await;
    }

    /// Send one unsolicited packet.
    pub async fn send(&mut self, fields: &[(&str, &str)]) {
        let mut packet = String::new();
        for (key, value) in fields {
            packet.push_str(&format!("{}: {}\r\n", key, value));
        }
        packet.push_str("\r\n");
        self.send_raw(&packet)
            .await;
    }

    pub async fn send_raw(&mut self, raw: &str) {
        // The client may already be gone in teardown paths
        let _ = self
            .writer
            .write_all(raw.as_bytes())
            .await;
    }

    /// Expect `Login` and accept it.
    pub async fn accept_login(&mut self) -> Fields {
        let login = self
            .expect_action("Login")
            .await;
        self.reply(
            &login,
            &[("Response", "Success"), ("Message", "Authentication accepted")],
        )
        .await;
        login
    }

    /// Answer whatever arrives until the client closes; `Logoff` gets `Goodbye`.
    pub async fn serve_until_closed(mut self) {
        while let Some(action) = self
            .read_action()
            .await
        {
            if action.get("Action").map(String::as_str) == Some("Logoff") {
                self.reply(
                    &action,
                    &[("Response", "Goodbye"), ("Message", "Thanks for all the fish.")],
                )
                .await;
            } else {
                self.reply(&action, &[("Response", "Success")])
                    .await;
            }
        }
    }
}

/// Accept one HTTP request, answer 200 and return its body.
pub async fn http_accept_one(listener: &TcpListener) -> String {
    let (mut socket, _) = listener
        .accept()
        .await
        .unwrap();
    let mut data = Vec::new();
    let mut buf = [0u8; 1024];
    let body_start = loop {
        let n = socket
            .read(&mut buf)
            .await
            .unwrap();
        assert!(n > 0, "HTTP client closed early");
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
        let n = socket
            .read(&mut buf)
            .await
            .unwrap();
        data.extend_from_slice(&buf[..n]);
    }
    socket
        .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n")
        .await
        .unwrap();
    String::from_utf8_lossy(&data[body_start..body_start + length]).into_owned()
}
