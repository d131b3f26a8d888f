//! End-to-end: real listener, HTTP upload and WebSocket progress stream

use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use importd::api::FILE_NAME_HEADER;
use importd::auth::JwtClaims;
use importd::config::Config;
use importd::server::{self, Services};

const SECRET: &str = "e2e-secret";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<server::Result<()>>,
    _temp_dir: TempDir,
}

impl TestServer {
    async fn start() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let mut config = Config::default();
        config.server.data_path = temp_dir.path().to_path_buf();
        config.queue.workers = 1;
        config.status.progress_every = 1;
        config.auth.passthrough = true;
        config.auth.jwt_secret = Some(SECRET.to_string());

        let services = Services::start(config).await.expect("Failed to start services");
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (stop, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(services.serve(listener, async move {
            let _ = stopped.await;
        }));

        Self {
            addr,
            stop: Some(stop),
            handle,
            _temp_dir: temp_dir,
        }
    }

    fn ws_url(&self, token: Option<&str>) -> String {
        match token {
            Some(token) => format!("ws://{}/ws?token={token}", self.addr),
            None => format!("ws://{}/ws", self.addr),
        }
    }

    async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("server did not shut down")
            .unwrap()
            .expect("server returned an error");
    }
}

fn token_for(sub: &str) -> String {
    let claims = JwtClaims {
        sub: sub.to_string(),
        exp: (chrono::Utc::now().timestamp() + 3600) as u64,
        iss: None,
        email: None,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

async fn next_json(socket: &mut Socket) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(10), socket.next())
            .await
            .expect("timed out waiting for message")
            .expect("socket closed")
            .expect("socket error");

        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn connect(server: &TestServer, sub: &str) -> Socket {
    let (mut socket, _) = connect_async(server.ws_url(Some(&token_for(sub))))
        .await
        .expect("Failed to connect");

    let welcome = next_json(&mut socket).await;
    assert_eq!(welcome["type"], "welcome");
    assert_eq!(welcome["message"], "Connected to server");
    assert_eq!(welcome["userId"], sub);
    socket
}

#[tokio::test]
async fn test_handshake_rejects_missing_and_invalid_tokens() {
    let server = TestServer::start().await;

    for url in [server.ws_url(None), server.ws_url(Some("garbage"))] {
        match connect_async(url.as_str()).await {
            Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 401, "{url}"),
            other => panic!("expected 401 for {url}, got {:?}", other.map(|_| ())),
        }
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_ping_pong() {
    let server = TestServer::start().await;
    let mut socket = connect(&server, "alice").await;

    socket
        .send(Message::Text(json!({"type": "ping"}).to_string().into()))
        .await
        .unwrap();
    assert_eq!(next_json(&mut socket).await, json!({"type": "pong"}));

    // Malformed input is logged and the connection stays usable
    socket.send(Message::Text("not json".into())).await.unwrap();
    socket
        .send(Message::Text(json!({"type": "ping"}).to_string().into()))
        .await
        .unwrap();
    assert_eq!(next_json(&mut socket).await["type"], "pong");

    server.shutdown().await;
}

#[tokio::test]
async fn test_progress_reaches_only_the_owner() {
    let server = TestServer::start().await;
    let mut alice = connect(&server, "alice").await;
    let mut bob = connect(&server, "bob").await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/import?batchDelay=0", server.addr))
        .bearer_auth(token_for("alice"))
        .header("content-type", "text/csv")
        .header(FILE_NAME_HEADER, "people.csv")
        .body("name,age\nada,36\ngrace,45\nlinus,28\n")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let accepted: Value = response.json().await.unwrap();
    let job_id = accepted["jobId"].as_str().unwrap().to_string();

    let mut progress = Vec::new();
    loop {
        let event = next_json(&mut alice).await;
        assert_eq!(event["jobId"], job_id.as_str());
        assert_eq!(event["userId"], "alice");
        progress.push(event["progress"].as_u64().unwrap());
        if event["status"] == "done" {
            assert_eq!(event["stats"]["created"], 3);
            assert_eq!(event["stats"]["total"], 3);
            break;
        }
    }
    assert_eq!(progress.last(), Some(&100));
    assert!(progress.windows(2).all(|pair| pair[0] <= pair[1]));

    let silence = tokio::time::timeout(Duration::from_millis(300), bob.next()).await;
    assert!(silence.is_err(), "bob received a message meant for alice");

    server.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_open_connections() {
    let server = TestServer::start().await;
    let mut socket = connect(&server, "alice").await;

    server.shutdown().await;

    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match socket.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "socket stayed open after shutdown");
}
