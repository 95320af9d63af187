//! End-to-end tests for the REST API over a fake messaging client.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use {
    axum::{Json, Router, extract::State, routing::post},
    serde_json::{Value, json},
    sqlx::SqlitePool,
    tokio::{net::TcpListener, sync::mpsc},
};

use {
    wabridge_config::WabridgeConfig,
    wabridge_gateway::{GatewayState, SqliteTenantStore, build_gateway_app},
    wabridge_messaging::{
        MessageEvent, NetworkEvent, PresenceEvent, TenantRecord, TenantStore,
        testing::{ConnectStep, FAKE_PAIRING_CODE, FakeClientFactory},
    },
};

struct TestGateway {
    base: String,
    http: reqwest::Client,
    store: Arc<dyn TenantStore>,
    factory: Arc<FakeClientFactory>,
}

impl TestGateway {
    async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    async fn start_with(configure: impl FnOnce(&mut WabridgeConfig)) -> Self {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        SqliteTenantStore::init(&pool).await.unwrap();
        let store: Arc<dyn TenantStore> = Arc::new(SqliteTenantStore::new(pool));
        let factory = FakeClientFactory::new();

        let mut config = WabridgeConfig::default();
        config.sessions.connect_wait_secs = 5;
        config.sessions.stop_timeout_secs = 5;
        configure(&mut config);
        let state = GatewayState::from_config(&config, Arc::clone(&store), factory.clone()).unwrap();
        let app = build_gateway_app(Arc::new(state));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        Self {
            base: format!("http://{addr}"),
            http: reqwest::Client::new(),
            store,
            factory,
        }
    }

    async fn tenant(&self, name: &str, token: &str) -> TenantRecord {
        self.store.create(name, token).await.unwrap()
    }

    async fn paired_tenant(&self, name: &str, token: &str) -> TenantRecord {
        let record = self.tenant(name, token).await;
        self.store
            .set_network_identity(record.id, "5491100000000@s.whatsapp.net")
            .await
            .unwrap();
        self.store.get(record.id).await.unwrap().unwrap()
    }

    async fn post(&self, path: &str, token: &str, body: Value) -> (u16, Value) {
        let resp = self
            .http
            .post(format!("{}{path}", self.base))
            .header("token", token)
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn get(&self, path: &str, token: &str) -> (u16, Value) {
        let resp = self
            .http
            .get(format!("{}{path}", self.base))
            .header("token", token)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }
}

/// Local webhook receiver forwarding each body to a channel.
async fn webhook_receiver() -> (String, mpsc::UnboundedReceiver<Value>) {
    async fn hook(State(tx): State<mpsc::UnboundedSender<Value>>, Json(body): Json<Value>) {
        let _ = tx.send(body);
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let app = Router::new().route("/hook", post(hook)).with_state(tx);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/hook"), rx)
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check().await {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn message(id: &str, body: &str) -> NetworkEvent {
    NetworkEvent::Message(MessageEvent {
        id: id.into(),
        chat: "5491155553934@s.whatsapp.net".into(),
        sender: "5491155553934@s.whatsapp.net".into(),
        push_name: Some("Ana".into()),
        is_group: false,
        from_me: false,
        timestamp: 1_700_000_100,
        body: Some(body.into()),
        media_type: None,
        quoted_id: None,
    })
}

#[tokio::test]
async fn health_reports_session_count() {
    let gw = TestGateway::start().await;
    let resp = reqwest::get(format!("{}/health", gw.base)).await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["sessions"], 0);
}

#[tokio::test]
async fn unknown_or_missing_token_is_rejected() {
    let gw = TestGateway::start().await;
    gw.tenant("alice", "alice-token").await;

    let (status, body) = gw.get("/status", "wrong").await;
    assert_eq!(status, 401);
    assert_eq!(
        body,
        json!({"code": 401, "success": false, "error": "Unauthorized"})
    );

    let resp = gw
        .http
        .get(format!("{}/webhook", gw.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 401);

    let resp = gw
        .http
        .get(format!("{}/webhook?token=alice-token", gw.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
}

#[tokio::test]
async fn connect_paired_tenant_and_receive_messages() {
    let gw = TestGateway::start().await;
    let (hook_url, mut hooks) = webhook_receiver().await;
    let record = gw.paired_tenant("alice", "alice-token").await;
    gw.store.set_webhook(record.id, &hook_url).await.unwrap();

    let (status, body) = gw
        .post("/connect", "alice-token", json!({"Subscribe": ["Message"]}))
        .await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["details"], "Connected!");
    assert_eq!(body["data"]["events"], "Message");
    assert_eq!(body["data"]["jid"], "5491100000000@s.whatsapp.net");

    let client = gw.factory.client(record.id);
    client.emit(NetworkEvent::Presence(PresenceEvent {
        from: "5491155553934@s.whatsapp.net".into(),
        unavailable: false,
        last_seen: None,
    }));
    client.emit(message("M1", "hola"));

    let delivered = tokio::time::timeout(Duration::from_secs(5), hooks.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivered["type"], "Message");
    assert_eq!(delivered["event"]["id"], "M1");
    assert_eq!(delivered["event"]["body"], "hola");

    let (status, body) = gw.get("/status", "alice-token").await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["connected"], true);
    assert_eq!(body["data"]["loggedIn"], true);
    assert_eq!(body["data"]["state"], "Connected");

    let stored = gw.store.get(record.id).await.unwrap().unwrap();
    assert_eq!(stored.events, "Message");
}

#[tokio::test]
async fn second_connect_conflicts() {
    let gw = TestGateway::start().await;
    gw.paired_tenant("alice", "alice-token").await;

    let (status, _) = gw
        .post("/connect", "alice-token", json!({"immediate": true}))
        .await;
    assert_eq!(status, 200);
    let (status, body) = gw.post("/connect", "alice-token", json!({})).await;
    assert_eq!(status, 409);
    assert_eq!(body["error"], "already connected");
}

#[tokio::test]
async fn empty_subscription_means_all() {
    let gw = TestGateway::start().await;
    gw.paired_tenant("alice", "alice-token").await;

    let (status, body) = gw.post("/connect", "alice-token", json!({})).await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["events"], "All");
}

#[tokio::test]
async fn unpaired_tenant_gets_pairing_qr() {
    let gw = TestGateway::start().await;
    let record = gw.tenant("bob", "bob-token").await;

    let (status, _) = gw.post("/connect", "bob-token", json!({})).await;
    assert_eq!(status, 200);

    let (status, body) = gw.get("/qr", "bob-token").await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["data"]["code"], FAKE_PAIRING_CODE);
    assert!(
        body["data"]["qrCode"]
            .as_str()
            .unwrap()
            .starts_with("data:image/svg+xml;base64,")
    );

    let (status, body) = gw.post("/logout", "bob-token", json!({})).await;
    assert_eq!(status, 409);
    assert_eq!(body["error"], "not logged in");

    gw.factory
        .client(record.id)
        .complete_pairing("5491177777777@s.whatsapp.net");
    let store = Arc::clone(&gw.store);
    eventually(|| {
        let store = Arc::clone(&store);
        async move {
            let r = store.get(record.id).await.unwrap().unwrap();
            r.network_identity == "5491177777777@s.whatsapp.net" && r.pairing_code.is_empty()
        }
    })
    .await;

    let (status, body) = gw.get("/qr", "bob-token").await;
    assert_eq!(status, 409);
    assert_eq!(body["error"], "already logged in");
}

#[tokio::test]
async fn disconnect_then_connect_again() {
    let gw = TestGateway::start().await;
    let record = gw.paired_tenant("alice", "alice-token").await;

    let (status, body) = gw.post("/disconnect", "alice-token", json!({})).await;
    assert_eq!(status, 409);
    assert_eq!(body["error"], "no session");

    gw.post("/connect", "alice-token", json!({})).await;
    let (status, body) = gw.post("/disconnect", "alice-token", json!({})).await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["details"], "Disconnected");
    assert_eq!(gw.factory.client(record.id).disconnect_calls(), 1);

    let (status, _) = gw.get("/status", "alice-token").await;
    assert_eq!(status, 409);

    let (status, _) = gw.post("/connect", "alice-token", json!({})).await;
    assert_eq!(status, 200);
    assert_eq!(gw.factory.created(), 2);

    let stored = gw.store.get(record.id).await.unwrap().unwrap();
    assert!(stored.is_paired(), "clean stop keeps the device identity");
}

#[tokio::test]
async fn logout_clears_pairing() {
    let gw = TestGateway::start().await;
    let record = gw.paired_tenant("alice", "alice-token").await;
    gw.post("/connect", "alice-token", json!({})).await;

    let (status, body) = gw.post("/logout", "alice-token", json!({})).await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["data"]["details"], "Logged out");
    assert_eq!(gw.factory.client(record.id).logout_calls(), 1);

    let store = Arc::clone(&gw.store);
    eventually(|| {
        let store = Arc::clone(&store);
        async move { !store.get(record.id).await.unwrap().unwrap().is_paired() }
    })
    .await;
}

#[tokio::test]
async fn connect_wait_times_out_on_hanging_link() {
    let gw = TestGateway::start_with(|c| c.sessions.connect_wait_secs = 1).await;
    let record = gw.paired_tenant("alice", "alice-token").await;
    gw.factory
        .client(record.id)
        .script_connect(ConnectStep::Hang);

    let (status, body) = gw
        .post("/connect", "alice-token", json!({"immediate": false}))
        .await;
    assert_eq!(status, 500);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "failed to connect");

    // The session is still registered and stoppable.
    let (status, body) = gw.get("/status", "alice-token").await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["data"]["state"], "Connecting");
    let (status, _) = gw.post("/disconnect", "alice-token", json!({})).await;
    assert_eq!(status, 200);
}

#[tokio::test]
async fn failed_logout_is_reported() {
    let gw = TestGateway::start().await;
    let record = gw.paired_tenant("alice", "alice-token").await;
    gw.post("/connect", "alice-token", json!({})).await;
    gw.factory.client(record.id).set_fail_logout(true);

    let (status, body) = gw.post("/logout", "alice-token", json!({})).await;
    assert_eq!(status, 500);
    assert_eq!(body["error"], "could not perform logout");
}

#[tokio::test]
async fn webhook_round_trip() {
    let gw = TestGateway::start().await;
    gw.tenant("alice", "alice-token").await;

    let (status, body) = gw
        .post(
            "/webhook",
            "alice-token",
            json!({"webhookURL": "https://example.com/in"}),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["webhook"], "https://example.com/in");

    let (status, body) = gw.get("/webhook", "alice-token").await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["webhook"], "https://example.com/in");

    let (status, _) = gw
        .post("/webhook", "alice-token", json!({"webhookURL": "ftp://x"}))
        .await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn send_text_requires_session_and_fields() {
    let gw = TestGateway::start().await;
    let record = gw.paired_tenant("alice", "alice-token").await;
    let payload = json!({"Phone": "+5491155553934", "Body": "hola"});

    let (status, body) = gw.post("/chat/send/text", "alice-token", payload.clone()).await;
    assert_eq!(status, 409);
    assert_eq!(body["error"], "no session");

    gw.post("/connect", "alice-token", json!({})).await;

    let (status, body) = gw
        .post("/chat/send/text", "alice-token", json!({"Phone": "1555"}))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "missing body in payload");

    let (status, body) = gw.post("/chat/send/text", "alice-token", payload).await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["data"]["details"], "Sent");
    assert!(body["data"]["id"].as_str().unwrap().starts_with("3EB0"));

    let sent = gw.factory.client(record.id).sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to.to_string(), "5491155553934@s.whatsapp.net");
    assert_eq!(sent[0].body, "hola");
}

#[tokio::test]
async fn malformed_payload_is_rejected() {
    let gw = TestGateway::start().await;
    gw.tenant("alice", "alice-token").await;

    let resp = gw
        .http
        .post(format!("{}/connect", gw.base))
        .header("token", "alice-token")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "could not decode payload");
}

#[tokio::test]
async fn only_super_tenants_create_users() {
    let gw = TestGateway::start().await;
    gw.tenant("super-admin", "admin-token").await;
    gw.tenant("alice", "alice-token").await;

    let (status, _) = gw
        .post("/admin/users", "alice-token", json!({"name": "x", "token": "y"}))
        .await;
    assert_eq!(status, 401);

    let (status, body) = gw
        .post("/admin/users", "admin-token", json!({"Name": "carol"}))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "missing token in payload");

    let (status, body) = gw
        .post(
            "/admin/users",
            "admin-token",
            json!({"Name": "carol", "Token": "carol-token"}),
        )
        .await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["data"]["details"], "User created successfully");
    assert!(gw.store.find_by_token("carol-token").await.unwrap().is_some());

    let (status, body) = gw
        .post(
            "/admin/users",
            "admin-token",
            json!({"name": "dup", "token": "carol-token"}),
        )
        .await;
    assert_eq!(status, 409);
    assert_eq!(body["error"], "user already exists");
}

#[tokio::test]
async fn database_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("wabridge.db");

    let pool = wabridge_gateway::open_database(&path).await.unwrap();
    SqliteTenantStore::new(pool.clone())
        .create("alice", "alice-token")
        .await
        .unwrap();
    pool.close().await;

    let pool = wabridge_gateway::open_database(&path).await.unwrap();
    let store = SqliteTenantStore::new(pool);
    let found = store.find_by_token("alice-token").await.unwrap().unwrap();
    assert_eq!(found.name, "alice");
}
