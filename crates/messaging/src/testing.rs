//! Scriptable in-process client for exercising session logic without a
//! network bridge.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;

use crate::{
    ChatPresenceMedia, ChatPresenceState, ClientFactory, Error, EventSink, Jid, MessagingClient,
    NetworkEvent, OutgoingText, Result, SendReceipt, TenantId, TenantRecord, UserCheck,
};

/// Pairing code emitted by [`FakeClient`] for unpaired tenants.
pub const FAKE_PAIRING_CODE: &str = "2@fake-pairing-code";

/// Timestamp reported for every fake send.
pub const FAKE_TIMESTAMP: i64 = 1_700_000_000;

/// What the next `connect()` call does.
#[derive(Debug, Clone)]
pub enum ConnectStep {
    /// Succeed and emit `Connected` (paired) or a pairing code (unpaired).
    Succeed,
    /// Succeed without emitting anything.
    Silent,
    Fail(String),
    /// Never return.
    Hang,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Default)]
pub struct FakeClient {
    sink: Mutex<Option<EventSink>>,
    script: Mutex<VecDeque<ConnectStep>>,
    connected: AtomicBool,
    logged_in: AtomicBool,
    fail_logout: AtomicBool,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    logouts: AtomicUsize,
    sent: Mutex<Vec<OutgoingText>>,
    reactions: Mutex<Vec<(String, String, String)>>,
    reads: Mutex<Vec<(String, Vec<String>)>>,
    presences: Mutex<Vec<(String, ChatPresenceState, ChatPresenceMedia)>>,
    next_id: AtomicUsize,
}

impl FakeClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue behavior for subsequent `connect()` calls. Once the queue is
    /// drained every connect succeeds.
    pub fn script_connect(&self, step: ConnectStep) {
        lock(&self.script).push_back(step);
    }

    pub fn set_logged_in(&self, value: bool) {
        self.logged_in.store(value, Ordering::SeqCst);
    }

    pub fn set_fail_logout(&self, value: bool) {
        self.fail_logout.store(value, Ordering::SeqCst);
    }

    /// Push an event as if it came from the network. Returns `false` when no
    /// sink is registered or the receiver is gone.
    pub fn emit(&self, event: NetworkEvent) -> bool {
        match lock(&self.sink).as_ref() {
            Some(sink) => sink.send(event).is_ok(),
            None => false,
        }
    }

    /// Simulate the user scanning the pairing code.
    pub fn complete_pairing(&self, identity: &str) {
        self.logged_in.store(true, Ordering::SeqCst);
        self.emit(NetworkEvent::PairSuccess {
            identity: identity.to_string(),
        });
        self.emit(NetworkEvent::Connected);
    }

    /// Simulate a dropped connection.
    pub fn drop_connection(&self, reason: &str) {
        self.connected.store(false, Ordering::SeqCst);
        self.emit(NetworkEvent::Disconnected {
            reason: reason.to_string(),
        });
    }

    pub fn connect_calls(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> usize {
        self.logouts.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<OutgoingText> {
        lock(&self.sent).clone()
    }

    pub fn reactions(&self) -> Vec<(String, String, String)> {
        lock(&self.reactions).clone()
    }

    pub fn reads(&self) -> Vec<(String, Vec<String>)> {
        lock(&self.reads).clone()
    }

    pub fn presences(&self) -> Vec<(String, ChatPresenceState, ChatPresenceMedia)> {
        lock(&self.presences).clone()
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    fn next_message_id(&self) -> String {
        format!("FAKE{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl MessagingClient for FakeClient {
    fn subscribe(&self, sink: EventSink) {
        *lock(&self.sink) = Some(sink);
    }

    async fn connect(&self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let step = lock(&self.script)
            .pop_front()
            .unwrap_or(ConnectStep::Succeed);
        match step {
            ConnectStep::Succeed => {
                self.connected.store(true, Ordering::SeqCst);
                if self.logged_in.load(Ordering::SeqCst) {
                    self.emit(NetworkEvent::Connected);
                } else {
                    self.emit(NetworkEvent::PairingCode {
                        code: FAKE_PAIRING_CODE.to_string(),
                    });
                }
                Ok(())
            },
            ConnectStep::Silent => {
                self.connected.store(true, Ordering::SeqCst);
                Ok(())
            },
            ConnectStep::Fail(message) => Err(Error::rejected(message)),
            ConnectStep::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            },
        }
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        if self.fail_logout.load(Ordering::SeqCst) {
            return Err(Error::rejected("logout refused"));
        }
        self.logged_in.store(false, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_logged_in(&self) -> bool {
        self.logged_in.load(Ordering::SeqCst)
    }

    async fn send_text(&self, message: OutgoingText) -> Result<SendReceipt> {
        self.ensure_connected()?;
        let id = message.id.clone().unwrap_or_else(|| self.next_message_id());
        lock(&self.sent).push(message);
        Ok(SendReceipt {
            id,
            timestamp: FAKE_TIMESTAMP,
        })
    }

    async fn send_reaction(
        &self,
        chat: &Jid,
        message_id: &str,
        emoji: &str,
    ) -> Result<SendReceipt> {
        self.ensure_connected()?;
        lock(&self.reactions).push((chat.to_string(), message_id.to_string(), emoji.to_string()));
        Ok(SendReceipt {
            id: self.next_message_id(),
            timestamp: FAKE_TIMESTAMP,
        })
    }

    async fn mark_read(&self, chat: &Jid, _sender: Option<&Jid>, ids: &[String]) -> Result<()> {
        self.ensure_connected()?;
        lock(&self.reads).push((chat.to_string(), ids.to_vec()));
        Ok(())
    }

    async fn send_chat_presence(
        &self,
        chat: &Jid,
        state: ChatPresenceState,
        media: ChatPresenceMedia,
    ) -> Result<()> {
        self.ensure_connected()?;
        lock(&self.presences).push((chat.to_string(), state, media));
        Ok(())
    }

    async fn check_users(&self, phones: &[String]) -> Result<Vec<UserCheck>> {
        self.ensure_connected()?;
        Ok(phones
            .iter()
            .map(|phone| {
                let jid = Jid::parse_recipient(phone).ok();
                UserCheck {
                    query: phone.clone(),
                    is_in_whatsapp: jid.is_some(),
                    jid: jid.map(|j| j.to_string()).unwrap_or_default(),
                    verified_name: String::new(),
                }
            })
            .collect())
    }
}

/// Hands out one [`FakeClient`] per tenant and reuses it across restarts.
#[derive(Default)]
pub struct FakeClientFactory {
    clients: Mutex<HashMap<TenantId, Arc<FakeClient>>>,
    created: AtomicUsize,
    fail_create: AtomicBool,
}

impl FakeClientFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The client that `create` returns for `tenant`.
    pub fn client(&self, tenant: TenantId) -> Arc<FakeClient> {
        Arc::clone(lock(&self.clients).entry(tenant).or_default())
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn set_fail_create(&self, value: bool) {
        self.fail_create.store(value, Ordering::SeqCst);
    }
}

impl ClientFactory for FakeClientFactory {
    fn create(&self, tenant: &TenantRecord) -> Result<Arc<dyn MessagingClient>> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(Error::rejected("client construction failed"));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        let client = self.client(tenant.id);
        client.set_logged_in(tenant.is_paired());
        Ok(client)
    }
}
