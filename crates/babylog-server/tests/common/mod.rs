#![allow(dead_code)]

use babylog_core::{AccessTokenValue, ClientFrame, Family, FamilyId, ServerFrame};
use babylog_server::{Opts, Server};
use futures_util::{SinkExt as _, StreamExt as _};
use serde::Deserialize;
use tempfile::TempDir;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;

pub const ADMIN_TOKEN: &str = "test-admin-token";

/// A sync server running on a random port with an ephemeral on-disk store.
pub struct TestServer {
    _temp_dir: TempDir,
    base_url: String,
    ws_url: String,
    admin: reqwest::Client,
}

impl TestServer {
    pub async fn start() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");

        let opts = Opts {
            listen: "127.0.0.1:0".to_string(),
            data_dir: temp_dir.path().to_path_buf(),
            cors_origin: None,
            admin_token: ADMIN_TOKEN.to_string(),
            busy_timeout: None,
        };

        let server = Server::init(opts).await.expect("failed to init server");
        let addr = server.addr().expect("failed to read bound addr");
        tokio::spawn(async move {
            let _ = server.run().await;
        });

        let admin = reqwest::Client::builder()
            .build()
            .expect("failed to build admin client");

        Self {
            _temp_dir: temp_dir,
            base_url: format!("http://{addr}"),
            ws_url: format!("ws://{addr}"),
            admin,
        }
    }

    pub async fn create_family(&self, name: &str) -> Family {
        self.admin
            .post(format!("{}/admin/families", self.base_url))
            .bearer_auth(ADMIN_TOKEN)
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await
            .expect("create_family request failed")
            .json()
            .await
            .expect("create_family response was not valid JSON")
    }

    pub async fn issue_token(&self, family_id: FamilyId) -> AccessTokenValue {
        #[derive(Deserialize)]
        struct IssuedToken {
            token: AccessTokenValue,
        }

        let issued: IssuedToken = self
            .admin
            .post(format!("{}/admin/families/{family_id}/tokens", self.base_url))
            .bearer_auth(ADMIN_TOKEN)
            .json(&serde_json::json!({}))
            .send()
            .await
            .expect("issue_token request failed")
            .json()
            .await
            .expect("issue_token response was not valid JSON");
        issued.token
    }

    pub async fn revoke_token(&self, token: AccessTokenValue) {
        self.admin
            .post(format!("{}/admin/tokens/{token}/revoke", self.base_url))
            .bearer_auth(ADMIN_TOKEN)
            .send()
            .await
            .expect("revoke_token request failed");
    }

    pub async fn connect(&self, token: AccessTokenValue) -> WsDriver {
        self.try_connect(token)
            .await
            .expect("websocket handshake failed")
    }

    pub async fn try_connect(
        &self,
        token: AccessTokenValue,
    ) -> Result<WsDriver, tokio_tungstenite::tungstenite::Error> {
        let mut request = format!("{}/ws", self.ws_url)
            .into_client_request()
            .expect("failed to build ws request");
        request.headers_mut().insert(
            "Cookie",
            format!("babylog_token={token}")
                .parse()
                .expect("cookie header should be valid"),
        );

        let (stream, _) = tokio_tungstenite::connect_async(request).await?;
        Ok(WsDriver { stream })
    }
}

/// A single WebSocket connection to the sync server, driven from test code.
pub struct WsDriver {
    stream: tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
}

impl WsDriver {
    pub async fn send(&mut self, frame: &ClientFrame) {
        let text = serde_json::to_string(frame).expect("ClientFrame always serializes");
        self.stream
            .send(Message::Text(text.into()))
            .await
            .expect("failed to send frame");
    }

    /// Reads the next frame, skipping `presence` frames (membership churn is
    /// not the subject of most tests and would otherwise make assertions
    /// depend on connection ordering).
    pub async fn recv(&mut self) -> ServerFrame {
        loop {
            let msg = self
                .stream
                .next()
                .await
                .expect("stream ended")
                .expect("websocket error");
            let Message::Text(text) = msg else {
                continue;
            };
            let frame: ServerFrame =
                serde_json::from_str(&text).expect("server frame should decode");
            if matches!(frame, ServerFrame::Presence { .. }) {
                continue;
            }
            return frame;
        }
    }
}
