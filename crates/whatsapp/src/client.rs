//! Per-tenant WebSocket client for the sidecar.

use std::{
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    dashmap::DashMap,
    futures::{SinkExt, StreamExt},
    serde::Deserialize,
    tokio::{
        sync::{mpsc, oneshot},
        task::JoinHandle,
    },
    tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message},
    tracing::{debug, info, warn},
    uuid::Uuid,
    wabridge_messaging::{
        ChatPresenceMedia, ChatPresenceState, ClientFactory, Error, EventSink, Jid,
        MessagingClient, NetworkEvent, OutgoingText, Result, SendReceipt, TenantRecord, UserCheck,
    },
};

use crate::types::{GatewayMessage, SidecarMessage};

/// Default sidecar WebSocket endpoint.
pub const DEFAULT_SIDECAR_URL: &str = "ws://127.0.0.1:7892";

/// How long `disconnect` waits for the link task to flush and close.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Connection settings shared by every tenant's client.
#[derive(Debug, Clone)]
pub struct SidecarSettings {
    pub url: String,
    pub request_timeout: Duration,
    /// Base directory; each tenant's credentials live in `<auth_dir>/<tenant id>`.
    pub auth_dir: PathBuf,
}

impl Default for SidecarSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_SIDECAR_URL.into(),
            request_timeout: Duration::from_secs(30),
            auth_dir: PathBuf::from("whatsapp-auth"),
        }
    }
}

struct ResultFrame {
    success: bool,
    data: serde_json::Value,
    error: Option<String>,
}

/// State touched by both the request side and the link task.
struct Shared {
    account_id: String,
    sink: Mutex<Option<EventSink>>,
    pending: DashMap<String, oneshot::Sender<ResultFrame>>,
    connected: AtomicBool,
    logged_in: AtomicBool,
    closing: AtomicBool,
}

impl Shared {
    fn emit(&self, event: NetworkEvent) {
        let sink = self.sink.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(sink) = sink.as_ref()
            && sink.send(event).is_err()
        {
            debug!(account_id = %self.account_id, "event sink closed, dropping event");
        }
    }

    fn dispatch(&self, msg: SidecarMessage) {
        if let Some(account_id) = msg.account_id()
            && account_id != self.account_id
        {
            return;
        }

        match msg {
            SidecarMessage::Qr { qr, .. } => {
                debug!(account_id = %self.account_id, "pairing code received");
                self.emit(NetworkEvent::PairingCode { code: qr });
            },
            SidecarMessage::PairSuccess { jid, .. } => {
                self.logged_in.store(true, Ordering::SeqCst);
                self.emit(NetworkEvent::PairSuccess { identity: jid });
            },
            SidecarMessage::Connected { jid, .. } => {
                self.connected.store(true, Ordering::SeqCst);
                if jid.is_some_and(|jid| !jid.is_empty()) {
                    self.logged_in.store(true, Ordering::SeqCst);
                }
                self.emit(NetworkEvent::Connected);
            },
            SidecarMessage::Disconnected { reason, .. } => {
                self.connected.store(false, Ordering::SeqCst);
                self.emit(NetworkEvent::Disconnected { reason });
            },
            SidecarMessage::LoggedOut { reason, .. } => {
                self.connected.store(false, Ordering::SeqCst);
                self.logged_in.store(false, Ordering::SeqCst);
                self.emit(NetworkEvent::LoggedOut { reason });
            },
            SidecarMessage::PairingTimeout { .. } => self.emit(NetworkEvent::PairingTimeout),
            SidecarMessage::Message { message, .. } => self.emit(NetworkEvent::Message(message)),
            SidecarMessage::Receipt { receipt, .. } => self.emit(NetworkEvent::Receipt(receipt)),
            SidecarMessage::Presence { presence, .. } => {
                self.emit(NetworkEvent::Presence(presence))
            },
            SidecarMessage::HistorySync { sync, .. } => self.emit(NetworkEvent::HistorySync(sync)),
            SidecarMessage::ChatPresenceUpdate { presence, .. } => {
                self.emit(NetworkEvent::ChatPresence(presence))
            },
            SidecarMessage::Result {
                request_id,
                success,
                data,
                error,
            } => match self.pending.remove(&request_id) {
                Some((_, tx)) => {
                    let _ = tx.send(ResultFrame {
                        success,
                        data,
                        error,
                    });
                },
                None => debug!(request_id, "result for unknown or expired request"),
            },
            SidecarMessage::Error { error, .. } => {
                warn!(account_id = %self.account_id, error, "sidecar error");
            },
        }
    }
}

struct Link {
    write_tx: mpsc::UnboundedSender<String>,
    task: JoinHandle<()>,
}

/// One tenant's session on the sidecar.
pub struct SidecarClient {
    shared: Arc<Shared>,
    settings: SidecarSettings,
    link: tokio::sync::Mutex<Option<Link>>,
}

impl SidecarClient {
    pub fn new(account_id: impl Into<String>, settings: SidecarSettings, paired: bool) -> Self {
        Self {
            shared: Arc::new(Shared {
                account_id: account_id.into(),
                sink: Mutex::new(None),
                pending: DashMap::new(),
                connected: AtomicBool::new(false),
                logged_in: AtomicBool::new(paired),
                closing: AtomicBool::new(false),
            }),
            settings,
            link: tokio::sync::Mutex::new(None),
        }
    }

    pub fn account_id(&self) -> &str {
        &self.shared.account_id
    }

    fn auth_dir(&self) -> PathBuf {
        self.settings.auth_dir.join(&self.shared.account_id)
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.shared.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    /// Send a frame without waiting for an answer.
    async fn post(&self, msg: &GatewayMessage) -> Result<()> {
        let frame = serde_json::to_string(msg)?;
        let link = self.link.lock().await;
        match link.as_ref() {
            Some(link) if link.write_tx.send(frame).is_ok() => Ok(()),
            _ => Err(Error::NotConnected),
        }
    }

    /// Send a request and wait for the matching `result` frame.
    async fn request(
        &self,
        operation: &'static str,
        build: impl FnOnce(String) -> GatewayMessage,
    ) -> Result<serde_json::Value> {
        let request_id = Uuid::new_v4().to_string();
        let msg = build(request_id.clone());
        let (tx, rx) = oneshot::channel();
        self.shared.pending.insert(request_id.clone(), tx);

        if let Err(e) = self.post(&msg).await {
            self.shared.pending.remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(self.settings.request_timeout, rx).await {
            Ok(Ok(result)) if result.success => Ok(result.data),
            Ok(Ok(result)) => Err(Error::rejected(
                result.error.unwrap_or_else(|| "unknown error".into()),
            )),
            // The link went away and dropped the pending sender.
            Ok(Err(_)) => Err(Error::NotConnected),
            Err(_) => {
                self.shared.pending.remove(&request_id);
                warn!(account_id = %self.shared.account_id, operation, "sidecar request timed out");
                Err(Error::timeout(operation))
            },
        }
    }

    async fn close_link(&self) -> Result<()> {
        let mut link = self.link.lock().await;
        self.shared.closing.store(true, Ordering::SeqCst);
        if let Some(Link { write_tx, task }) = link.take() {
            let frame = serde_json::to_string(&GatewayMessage::Disconnect {
                account_id: self.shared.account_id.clone(),
            })?;
            let _ = write_tx.send(frame);
            drop(write_tx);
            if tokio::time::timeout(CLOSE_GRACE, task).await.is_err() {
                debug!(account_id = %self.shared.account_id, "link task did not close in time");
            }
        }
        self.shared.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Deserialize)]
struct UsersPayload {
    #[serde(default)]
    users: Vec<UserCheck>,
}

#[async_trait]
impl MessagingClient for SidecarClient {
    fn subscribe(&self, sink: EventSink) {
        *self.shared.sink.lock().unwrap_or_else(|e| e.into_inner()) = Some(sink);
    }

    async fn connect(&self) -> Result<()> {
        let mut link = self.link.lock().await;
        if let Some(old) = link.take() {
            old.task.abort();
            // The aborted task never reaches its own cleanup.
            self.shared.pending.clear();
        }

        let (ws, _response) = connect_async(self.settings.url.as_str())
            .await
            .map_err(|e| Error::upstream("failed to reach whatsapp sidecar", e))?;
        self.shared.closing.store(false, Ordering::SeqCst);

        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_link(ws, write_rx, Arc::clone(&self.shared)));

        let login = serde_json::to_string(&GatewayMessage::Login {
            account_id: self.shared.account_id.clone(),
            auth_dir: self.auth_dir().to_string_lossy().into_owned(),
        })?;
        if write_tx.send(login).is_err() {
            return Err(Error::NotConnected);
        }
        *link = Some(Link { write_tx, task });

        info!(account_id = %self.shared.account_id, url = %self.settings.url, "sidecar login requested");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.close_link().await
    }

    async fn logout(&self) -> Result<()> {
        let account_id = self.shared.account_id.clone();
        self.request("logout", |request_id| GatewayMessage::Logout {
            request_id,
            account_id,
        })
        .await?;
        self.shared.logged_in.store(false, Ordering::SeqCst);
        self.close_link().await
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn is_logged_in(&self) -> bool {
        self.shared.logged_in.load(Ordering::SeqCst)
    }

    async fn send_text(&self, message: OutgoingText) -> Result<SendReceipt> {
        self.ensure_connected()?;
        let account_id = self.shared.account_id.clone();
        let data = self
            .request("send_text", |request_id| GatewayMessage::SendText {
                request_id,
                account_id,
                to: message.to.to_string(),
                body: message.body,
                id: message.id,
                quoted: message.quoted,
            })
            .await?;
        Ok(serde_json::from_value(data)?)
    }

    async fn send_reaction(
        &self,
        chat: &Jid,
        message_id: &str,
        emoji: &str,
    ) -> Result<SendReceipt> {
        self.ensure_connected()?;
        let account_id = self.shared.account_id.clone();
        let data = self
            .request("react", |request_id| GatewayMessage::React {
                request_id,
                account_id,
                chat: chat.to_string(),
                message_id: message_id.to_string(),
                emoji: emoji.to_string(),
            })
            .await?;
        Ok(serde_json::from_value(data)?)
    }

    async fn mark_read(&self, chat: &Jid, sender: Option<&Jid>, ids: &[String]) -> Result<()> {
        self.ensure_connected()?;
        let account_id = self.shared.account_id.clone();
        self.request("mark_read", |request_id| GatewayMessage::MarkRead {
            request_id,
            account_id,
            chat: chat.to_string(),
            sender: sender.map(ToString::to_string),
            ids: ids.to_vec(),
        })
        .await?;
        Ok(())
    }

    async fn send_chat_presence(
        &self,
        chat: &Jid,
        state: ChatPresenceState,
        media: ChatPresenceMedia,
    ) -> Result<()> {
        self.ensure_connected()?;
        let account_id = self.shared.account_id.clone();
        self.request("chat_presence", |request_id| GatewayMessage::ChatPresence {
            request_id,
            account_id,
            chat: chat.to_string(),
            state,
            media,
        })
        .await?;
        Ok(())
    }

    async fn check_users(&self, phones: &[String]) -> Result<Vec<UserCheck>> {
        self.ensure_connected()?;
        let account_id = self.shared.account_id.clone();
        let data = self
            .request("check_users", |request_id| GatewayMessage::CheckUsers {
                request_id,
                account_id,
                phones: phones.to_vec(),
            })
            .await?;
        let payload: UsersPayload = serde_json::from_value(data)?;
        Ok(payload.users)
    }
}

/// Pump frames between the socket and the client until either side closes.
async fn run_link(
    ws: WsStream,
    mut write_rx: mpsc::UnboundedReceiver<String>,
    shared: Arc<Shared>,
) {
    let (mut ws_sink, mut ws_reader) = ws.split();

    let reason = loop {
        tokio::select! {
            msg = ws_reader.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<SidecarMessage>(text.as_str()) {
                            Ok(msg) => shared.dispatch(msg),
                            Err(e) => warn!(error = %e, "unparseable sidecar frame"),
                        }
                    },
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                            break format!("sidecar write failed: {e}");
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => break "sidecar closed the connection".to_string(),
                    Some(Ok(_)) => {},
                    Some(Err(e)) => break format!("sidecar read failed: {e}"),
                }
            },
            out = write_rx.recv() => {
                match out {
                    Some(text) => {
                        if let Err(e) = ws_sink.send(Message::Text(text.into())).await {
                            break format!("sidecar write failed: {e}");
                        }
                    },
                    None => {
                        let _ = ws_sink.send(Message::Close(None)).await;
                        break String::new();
                    },
                }
            },
        }
    };

    shared.connected.store(false, Ordering::SeqCst);
    // Dropping the senders wakes every waiter with `NotConnected`.
    shared.pending.clear();

    if !shared.closing.load(Ordering::SeqCst) {
        warn!(account_id = %shared.account_id, reason, "sidecar link lost");
        shared.emit(NetworkEvent::Disconnected { reason });
    }
}

/// Builds [`SidecarClient`]s that all talk to the same sidecar.
pub struct SidecarClientFactory {
    settings: SidecarSettings,
}

impl SidecarClientFactory {
    pub fn new(settings: SidecarSettings) -> Self {
        Self { settings }
    }
}

impl ClientFactory for SidecarClientFactory {
    fn create(&self, tenant: &TenantRecord) -> Result<Arc<dyn MessagingClient>> {
        Ok(Arc::new(SidecarClient::new(
            tenant.id.to_string(),
            self.settings.clone(),
            tenant.is_paired(),
        )))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        serde_json::json,
        tokio::net::TcpListener,
        tokio_tungstenite::accept_async,
    };

    async fn next_frame(
        ws: &mut WebSocketStream<tokio::net::TcpStream>,
    ) -> GatewayMessage {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(text.as_str()).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    }

    fn settings(addr: std::net::SocketAddr, timeout: Duration) -> SidecarSettings {
        SidecarSettings {
            url: format!("ws://{addr}"),
            request_timeout: timeout,
            auth_dir: PathBuf::from("/tmp/wa-auth"),
        }
    }

    #[tokio::test]
    async fn login_events_and_send_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();

            let GatewayMessage::Login {
                account_id,
                auth_dir,
            } = next_frame(&mut ws).await
            else {
                panic!("expected login");
            };
            assert_eq!(account_id, "7");
            assert_eq!(auth_dir, "/tmp/wa-auth/7");

            for frame in [
                json!({"type": "qr", "account_id": "9", "qr": "not-ours"}),
                json!({"type": "qr", "account_id": "7", "qr": "2@abc"}),
                json!({"type": "connected", "account_id": "7"}),
            ] {
                ws.send(Message::Text(frame.to_string().into())).await.unwrap();
            }

            let GatewayMessage::SendText {
                request_id, to, ..
            } = next_frame(&mut ws).await
            else {
                panic!("expected send_text");
            };
            assert_eq!(to, "15550001111@s.whatsapp.net");
            let reply = json!({
                "type": "result",
                "request_id": request_id,
                "success": true,
                "data": {"id": "M1", "timestamp": 5}
            });
            ws.send(Message::Text(reply.to_string().into())).await.unwrap();

            let paired = json!({"type": "connected", "account_id": "7", "jid": "7@s.whatsapp.net"});
            ws.send(Message::Text(paired.to_string().into())).await.unwrap();

            assert!(matches!(
                next_frame(&mut ws).await,
                GatewayMessage::Disconnect { .. }
            ));
        });

        let client = SidecarClient::new("7", settings(addr, Duration::from_secs(5)), false);
        let (tx, mut rx) = mpsc::unbounded_channel();
        client.subscribe(tx);
        client.connect().await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), NetworkEvent::PairingCode {
            code: "2@abc".into()
        });
        assert_eq!(rx.recv().await.unwrap(), NetworkEvent::Connected);
        assert!(client.is_connected());
        // Connected without an identity is not a login.
        assert!(!client.is_logged_in());

        let receipt = client
            .send_text(OutgoingText {
                to: Jid::parse_recipient("15550001111").unwrap(),
                body: "hi".into(),
                id: None,
                quoted: None,
            })
            .await
            .unwrap();
        assert_eq!(receipt.id, "M1");
        assert_eq!(receipt.timestamp, 5);

        assert_eq!(rx.recv().await.unwrap(), NetworkEvent::Connected);
        assert!(client.is_logged_in());

        client.disconnect().await.unwrap();
        assert!(!client.is_connected());
        server.await.unwrap();
        // A deliberate close does not report a lost link.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unanswered_request_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let _login = next_frame(&mut ws).await;
            ws.send(Message::Text(
                json!({"type": "connected", "account_id": "1"}).to_string().into(),
            ))
            .await
            .unwrap();
            // Swallow everything else without answering.
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_close() {
                    break;
                }
            }
        });

        let client = SidecarClient::new("1", settings(addr, Duration::from_millis(100)), true);
        let (tx, mut rx) = mpsc::unbounded_channel();
        client.subscribe(tx);
        client.connect().await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), NetworkEvent::Connected);

        let err = client
            .check_users(&["15550001111".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));

        client.disconnect().await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn reconnect_fails_requests_on_the_old_link() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, seen_rx) = oneshot::channel();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut first = accept_async(stream).await.unwrap();
            let _login = next_frame(&mut first).await;
            first
                .send(Message::Text(
                    json!({"type": "connected", "account_id": "3", "jid": "3@s.whatsapp.net"})
                        .to_string()
                        .into(),
                ))
                .await
                .unwrap();
            assert!(matches!(
                next_frame(&mut first).await,
                GatewayMessage::CheckUsers { .. }
            ));
            seen_tx.send(()).unwrap();

            let (stream, _) = listener.accept().await.unwrap();
            let mut second = accept_async(stream).await.unwrap();
            let _login = next_frame(&mut second).await;
            while let Some(Ok(msg)) = second.next().await {
                if msg.is_close() {
                    break;
                }
            }
        });

        let client = Arc::new(SidecarClient::new(
            "3",
            settings(addr, Duration::from_secs(30)),
            true,
        ));
        let (tx, mut rx) = mpsc::unbounded_channel();
        client.subscribe(tx);
        client.connect().await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), NetworkEvent::Connected);

        let in_flight = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.check_users(&["15550001111".into()]).await })
        };
        seen_rx.await.unwrap();

        client.connect().await.unwrap();
        let err = tokio::time::timeout(Duration::from_secs(2), in_flight)
            .await
            .expect("request on the replaced link should fail promptly")
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, Error::NotConnected));

        client.disconnect().await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn sends_fail_fast_when_not_connected() {
        let client = SidecarClient::new("1", SidecarSettings::default(), false);
        let err = client
            .mark_read(&Jid::parse_recipient("1").unwrap(), None, &["A".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotConnected));
    }
}
