//! Single-shot HTTP health probes against a server's admin page.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use crate::models::{Server, ServerStatus, ADMIN_PATH};

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(3000);

/// What came back from the wire, before it is mapped to a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Response(u16),
    TimedOut,
    ConnectFailed,
}

pub fn classify(outcome: ProbeOutcome) -> ServerStatus {
    match outcome {
        ProbeOutcome::Response(200) => ServerStatus::Online,
        ProbeOutcome::Response(_) => ServerStatus::Error,
        ProbeOutcome::TimedOut => ServerStatus::Timeout,
        ProbeOutcome::ConnectFailed => ServerStatus::Offline,
    }
}

/// Overwrites the probe fields of `server`. No history is kept.
pub fn apply_probe_result(server: &mut Server, status: ServerStatus) {
    server.status = status;
    server.last_checked = Some(Utc::now());
}

/// Health check seam. Implementations never fail: transport problems are
/// reported as statuses.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self, ip: &str, port: u16) -> ServerStatus;
}

/// Probes `server` and records the result on it.
pub async fn probe(prober: &dyn HealthProbe, server: &mut Server) -> ServerStatus {
    let status = prober.check(&server.ip, server.port).await;
    debug!(server_id = server.id, ip = %server.ip, port = server.port, ?status, "Probe finished");
    apply_probe_result(server, status);
    status
}

pub struct HttpProber {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpProber {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()?;
        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl HealthProbe for HttpProber {
    async fn check(&self, ip: &str, port: u16) -> ServerStatus {
        let url = format!("http://{}:{}{}", ip, port, ADMIN_PATH);
        let outcome = match tokio::time::timeout(self.timeout, self.client.get(&url).send()).await {
            Ok(Ok(resp)) => ProbeOutcome::Response(resp.status().as_u16()),
            Ok(Err(e)) if e.is_timeout() => ProbeOutcome::TimedOut,
            Ok(Err(e)) => {
                debug!(%url, error = %e, "Probe connection failed");
                ProbeOutcome::ConnectFailed
            }
            Err(_) => ProbeOutcome::TimedOut,
        };
        classify(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::default_server;
    use axum::{http::StatusCode, routing::get, Router};
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    async fn serve(status: StatusCode) -> SocketAddr {
        let app = Router::new().route(ADMIN_PATH, get(move || async move { status }));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn prober() -> HttpProber {
        HttpProber::new(Duration::from_millis(300)).unwrap()
    }

    #[test]
    fn classification_table() {
        assert_eq!(classify(ProbeOutcome::Response(200)), ServerStatus::Online);
        assert_eq!(classify(ProbeOutcome::Response(204)), ServerStatus::Error);
        assert_eq!(classify(ProbeOutcome::Response(500)), ServerStatus::Error);
        assert_eq!(classify(ProbeOutcome::TimedOut), ServerStatus::Timeout);
        assert_eq!(classify(ProbeOutcome::ConnectFailed), ServerStatus::Offline);
    }

    #[tokio::test]
    async fn ok_response_is_online() {
        let addr = serve(StatusCode::OK).await;
        assert_eq!(prober().check("127.0.0.1", addr.port()).await, ServerStatus::Online);
    }

    #[tokio::test]
    async fn server_error_is_error_not_offline() {
        let addr = serve(StatusCode::INTERNAL_SERVER_ERROR).await;
        let mut server = default_server();
        server.ip = "127.0.0.1".into();
        server.port = addr.port();

        let status = probe(&prober(), &mut server).await;
        assert_eq!(status, ServerStatus::Error);
        assert_eq!(server.status, ServerStatus::Error);
        assert!(server.last_checked.is_some());
    }

    #[tokio::test]
    async fn refused_connection_is_offline() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert_eq!(prober().check("127.0.0.1", port).await, ServerStatus::Offline);
    }

    #[tokio::test]
    async fn silent_server_is_timeout() {
        // Accepted by the kernel backlog but never answered.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        assert_eq!(prober().check("127.0.0.1", port).await, ServerStatus::Timeout);
        drop(listener);
    }

    #[tokio::test]
    async fn probe_overwrites_previous_status() {
        let addr = serve(StatusCode::OK).await;
        let mut server = default_server();
        server.ip = "127.0.0.1".into();
        server.port = addr.port();
        server.status = ServerStatus::Timeout;

        probe(&prober(), &mut server).await;
        assert_eq!(server.status, ServerStatus::Online);
    }
}
