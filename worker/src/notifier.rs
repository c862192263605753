// ==============================================================================
// notifier.rs - Completion Callback
// ==============================================================================
// Description: Tells the UDN gateway an exported file has been submitted
// Author: Matt Barham
// Created: 2026-10-12
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use zeroize::Zeroize;

use crate::config::WorkerConfig;

const CALLBACK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Gateway answered HTTP {0}")]
    Status(u16),

    #[error("HTTP error: {0}")]
    Transport(String),

    #[error("Callback task failed: {0}")]
    Task(String),
}

/// Completion callback seam
pub trait CompletionNotifier: Send + Sync {
    /// Mark export record `export_id` complete
    fn notify(&self, export_id: &str) -> impl Future<Output = Result<(), NotifyError>> + Send;
}

/// `POST {api}/api/superadmin/dbgap/exported_files/{id}/complete`
pub struct HttpCompletionNotifier {
    agent: ureq::Agent,
    base_url: String,
    token: String,
}

impl HttpCompletionNotifier {
    pub fn new(config: &WorkerConfig) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(CALLBACK_TIMEOUT).build();
        Self {
            agent,
            base_url: config.secret.udn_api_url.trim_end_matches('/').to_string(),
            token: config.secret.udn_api_token.clone(),
        }
    }

    pub fn completion_url(&self, export_id: &str) -> String {
        format!(
            "{}/api/superadmin/dbgap/exported_files/{}/complete",
            self.base_url, export_id
        )
    }
}

impl CompletionNotifier for HttpCompletionNotifier {
    async fn notify(&self, export_id: &str) -> Result<(), NotifyError> {
        let agent = self.agent.clone();
        let url = self.completion_url(export_id);
        let authorization = format!("Token {}", self.token);
        let body = serde_json::json!({ "exportfile_id": export_id });

        let status = tokio::task::spawn_blocking(move || {
            let request = agent
                .post(&url)
                .set("Content-Type", "application/json")
                .set("Authorization", &authorization);

            match request.send_json(body) {
                Ok(response) => Ok(response.status()),
                Err(ureq::Error::Status(code, _)) => Err(NotifyError::Status(code)),
                Err(ureq::Error::Transport(err)) => Err(NotifyError::Transport(err.to_string())),
            }
        })
        .await
        .map_err(|e| NotifyError::Task(e.to_string()))??;

        if status != 200 {
            return Err(NotifyError::Status(status));
        }

        info!("Marked export {} complete", export_id);
        Ok(())
    }
}

impl Drop for HttpCompletionNotifier {
    fn drop(&mut self) {
        self.token.zeroize();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records every callback; optionally fails them
    #[derive(Default)]
    pub(crate) struct RecordingNotifier {
        pub notified: Mutex<Vec<String>>,
        pub fail: bool,
    }

    impl CompletionNotifier for RecordingNotifier {
        async fn notify(&self, export_id: &str) -> Result<(), NotifyError> {
            self.notified.lock().unwrap().push(export_id.to_string());
            if self.fail {
                return Err(NotifyError::Status(500));
            }
            Ok(())
        }
    }

    /// Answer one HTTP request with `status`, returning the raw request text
    fn one_shot_server(status: &'static str) -> (String, std::thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = stream.read(&mut buf).unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text
                        .lines()
                        .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length:").map(|v| v.trim().to_string()))
                        .and_then(|v| v.parse::<usize>().ok())
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let response = format!("HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n", status);
            stream.write_all(response.as_bytes()).unwrap();
            String::from_utf8_lossy(&request).to_string()
        });

        (url, handle)
    }

    fn notifier_for(url: &str) -> (TempDir, HttpCompletionNotifier) {
        let root = TempDir::new().unwrap();
        let mut config = test_config("test", root.path());
        config.secret.udn_api_url = format!("{}/", url);
        let notifier = HttpCompletionNotifier::new(&config);
        (root, notifier)
    }

    #[test]
    fn test_completion_url() {
        let (_root, notifier) = notifier_for("https://gateway.example.org");
        assert_eq!(
            notifier.completion_url("4242"),
            "https://gateway.example.org/api/superadmin/dbgap/exported_files/4242/complete"
        );
    }

    #[tokio::test]
    async fn test_notify_success() {
        let (url, server) = one_shot_server("200 OK");
        let (_root, notifier) = notifier_for(&url);

        notifier.notify("4242").await.unwrap();

        let request = server.join().unwrap();
        assert!(request.starts_with("POST /api/superadmin/dbgap/exported_files/4242/complete "));
        assert!(request.contains("Authorization: Token token"));
    }

    #[tokio::test]
    async fn test_notify_reports_server_error() {
        let (url, server) = one_shot_server("500 Internal Server Error");
        let (_root, notifier) = notifier_for(&url);

        let err = notifier.notify("4242").await.unwrap_err();
        server.join().unwrap();
        assert!(matches!(err, NotifyError::Status(500)));
    }

    #[tokio::test]
    async fn test_notify_unreachable_gateway() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        let (_root, notifier) = notifier_for(&url);

        let err = notifier.notify("4242").await.unwrap_err();
        assert!(matches!(err, NotifyError::Transport(_)));
    }
}
