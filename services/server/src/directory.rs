//! The in-memory directory of who is online and through which live
//! connections (§4.D). A single struct owns all cross-referenced maps,
//! guarded by one `RwLock` per map, matching the teacher's `AppState`
//! pattern — sharding by key hash is a documented future option, not
//! implemented, per §9's design notes.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, RwLock};

use msg_protocol::Envelope;

pub type ConnectionId = u64;

/// A single accepted transport's state, memory-only (§3 Live Connection).
/// Holds only a handle to its outbound channel, never a back-pointer into
/// the reader/writer tasks, so Directory never forms a reference cycle
/// with a connection's own I/O tasks.
pub struct ConnectionHandle {
    pub connection_id: ConnectionId,
    pub remote_addr: IpAddr,
    pub writer_tx: mpsc::Sender<Envelope>,
    pub kill_tx: mpsc::Sender<()>,
    pub user_id: AtomicI64,
    pub username: RwLock<Option<String>>,
    /// The opaque session token issued at login, so `logout` can invalidate
    /// the matching `sessions` row (§3: "invalidated at logout or expiry").
    pub session_token: RwLock<Option<String>>,
    pub authenticated: AtomicBool,
    pub last_activity: AtomicU64,
    pub bytes_in: AtomicU64,
    pub bytes_out: AtomicU64,
    pub malformed_count: AtomicU32,
    pub consecutive_slow_sends: AtomicU32,
    pub should_close: AtomicBool,
}

const NO_USER: i64 = -1;

impl ConnectionHandle {
    pub(crate) fn new(
        connection_id: ConnectionId,
        remote_addr: IpAddr,
        writer_tx: mpsc::Sender<Envelope>,
        kill_tx: mpsc::Sender<()>,
    ) -> Self {
        Self {
            connection_id,
            remote_addr,
            writer_tx,
            kill_tx,
            user_id: AtomicI64::new(NO_USER),
            username: RwLock::new(None),
            session_token: RwLock::new(None),
            authenticated: AtomicBool::new(false),
            last_activity: AtomicU64::new(now_unix()),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
            malformed_count: AtomicU32::new(0),
            consecutive_slow_sends: AtomicU32::new(0),
            should_close: AtomicBool::new(false),
        }
    }

    /// Marks the connection for closure and wakes its reader/writer tasks,
    /// which both select on `kill_tx`'s receiving half (§4.D slow-consumer
    /// and policy-violation closes).
    pub fn force_close(&self) {
        self.should_close.store(true, Ordering::Relaxed);
        let _ = self.kill_tx.try_send(());
    }

    pub fn user_id(&self) -> Option<i64> {
        match self.user_id.load(Ordering::Relaxed) {
            NO_USER => None,
            id => Some(id),
        }
    }

    pub fn touch(&self) {
        self.last_activity.store(now_unix(), Ordering::Relaxed);
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Relaxed)
    }
}

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy)]
pub struct EndpointHint {
    pub ip: IpAddr,
    pub port: u16,
    pub last_heartbeat: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryError {
    ServerBusy,
    IpLimit,
    UserSessionLimit,
}

impl DirectoryError {
    pub fn code(self) -> &'static str {
        match self {
            DirectoryError::ServerBusy => "server_busy",
            DirectoryError::IpLimit => "ip_limit",
            DirectoryError::UserSessionLimit => "user_session_limit",
        }
    }
}

struct Inner {
    conn_by_id: RwLock<HashMap<ConnectionId, Arc<ConnectionHandle>>>,
    conns_by_user_id: RwLock<HashMap<i64, HashSet<ConnectionId>>>,
    conns_by_username: RwLock<HashMap<String, HashSet<ConnectionId>>>,
    conns_by_ip: RwLock<HashMap<IpAddr, HashSet<ConnectionId>>>,
    endpoint_by_user: RwLock<HashMap<i64, EndpointHint>>,
    usernames: RwLock<HashMap<ConnectionId, String>>,
}

/// Shared, cloneable handle onto the directory's maps.
#[derive(Clone)]
pub struct Directory {
    inner: Arc<Inner>,
    max_connections: usize,
    max_per_ip: usize,
    max_per_user: usize,
}

impl Directory {
    pub fn new(max_connections: usize, max_per_ip: usize, max_per_user: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                conn_by_id: RwLock::new(HashMap::new()),
                conns_by_user_id: RwLock::new(HashMap::new()),
                conns_by_username: RwLock::new(HashMap::new()),
                conns_by_ip: RwLock::new(HashMap::new()),
                endpoint_by_user: RwLock::new(HashMap::new()),
                usernames: RwLock::new(HashMap::new()),
            }),
            max_connections,
            max_per_ip,
            max_per_user,
        }
    }

    pub async fn total_connections(&self) -> usize {
        self.inner.conn_by_id.read().await.len()
    }

    /// Accepts a brand-new, pre-authentication connection. Enforces the
    /// process-wide and per-IP policy caps (§4.D); the per-user cap is
    /// enforced later, at `authenticate_connection`, since the user isn't
    /// known yet.
    pub async fn register_connection(
        &self,
        remote_addr: IpAddr,
        writer_tx: mpsc::Sender<Envelope>,
        kill_tx: mpsc::Sender<()>,
    ) -> Result<(ConnectionId, Arc<ConnectionHandle>), DirectoryError> {
        if self.inner.conn_by_id.read().await.len() >= self.max_connections {
            return Err(DirectoryError::ServerBusy);
        }
        {
            let by_ip = self.inner.conns_by_ip.read().await;
            if by_ip.get(&remote_addr).map(HashSet::len).unwrap_or(0) >= self.max_per_ip {
                return Err(DirectoryError::IpLimit);
            }
        }

        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        let connection_id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let handle = Arc::new(ConnectionHandle::new(connection_id, remote_addr, writer_tx, kill_tx));

        self.inner
            .conn_by_id
            .write()
            .await
            .insert(connection_id, handle.clone());
        self.inner
            .conns_by_ip
            .write()
            .await
            .entry(remote_addr)
            .or_default()
            .insert(connection_id);

        Ok((connection_id, handle))
    }

    /// Binds an authenticated connection to `(user_id, username)`. Rejects
    /// with `UserSessionLimit` if the user already has the configured
    /// maximum number of concurrent live connections.
    pub async fn authenticate_connection(
        &self,
        connection_id: ConnectionId,
        user_id: i64,
        username: &str,
    ) -> Result<(), DirectoryError> {
        {
            let by_user = self.inner.conns_by_user_id.read().await;
            if by_user.get(&user_id).map(HashSet::len).unwrap_or(0) >= self.max_per_user {
                return Err(DirectoryError::UserSessionLimit);
            }
        }

        let handle = { self.inner.conn_by_id.read().await.get(&connection_id).cloned() };
        if let Some(handle) = handle {
            handle.user_id.store(user_id, Ordering::Relaxed);
            handle.authenticated.store(true, Ordering::Relaxed);
            *handle.username.write().await = Some(username.to_owned());
        }

        self.inner
            .conns_by_user_id
            .write()
            .await
            .entry(user_id)
            .or_default()
            .insert(connection_id);
        self.inner
            .conns_by_username
            .write()
            .await
            .entry(username.to_owned())
            .or_default()
            .insert(connection_id);
        self.inner
            .usernames
            .write()
            .await
            .insert(connection_id, username.to_owned());

        Ok(())
    }

    pub async fn drop_connection(&self, connection_id: ConnectionId) {
        let handle = self.inner.conn_by_id.write().await.remove(&connection_id);
        let Some(handle) = handle else { return };

        {
            let mut by_ip = self.inner.conns_by_ip.write().await;
            if let Some(set) = by_ip.get_mut(&handle.remote_addr) {
                set.remove(&connection_id);
                if set.is_empty() {
                    by_ip.remove(&handle.remote_addr);
                }
            }
        }

        if let Some(user_id) = handle.user_id() {
            let mut by_user = self.inner.conns_by_user_id.write().await;
            if let Some(set) = by_user.get_mut(&user_id) {
                set.remove(&connection_id);
                if set.is_empty() {
                    by_user.remove(&user_id);
                }
            }
        }

        let username = self.inner.usernames.write().await.remove(&connection_id);
        if let Some(username) = username {
            let mut by_username = self.inner.conns_by_username.write().await;
            if let Some(set) = by_username.get_mut(&username) {
                set.remove(&connection_id);
                if set.is_empty() {
                    by_username.remove(&username);
                }
            }
        }
    }

    pub async fn connection(&self, connection_id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.inner.conn_by_id.read().await.get(&connection_id).cloned()
    }

    /// All live connection handles for a user, by username (the identity a
    /// handler's fan-out plan addresses recipients by, per §4.E).
    pub async fn sessions_for_user(&self, username: &str) -> Vec<Arc<ConnectionHandle>> {
        let ids = {
            let by_username = self.inner.conns_by_username.read().await;
            match by_username.get(username) {
                Some(set) => set.iter().copied().collect::<Vec<_>>(),
                None => return Vec::new(),
            }
        };
        let conn_by_id = self.inner.conn_by_id.read().await;
        ids.into_iter().filter_map(|id| conn_by_id.get(&id).cloned()).collect()
    }

    pub async fn is_online(&self, username: &str) -> bool {
        self.inner
            .conns_by_username
            .read()
            .await
            .get(username)
            .map(|set| !set.is_empty())
            .unwrap_or(false)
    }

    pub async fn update_endpoint_hint(&self, user_id: i64, ip: IpAddr, port: u16) {
        self.inner.endpoint_by_user.write().await.insert(
            user_id,
            EndpointHint {
                ip,
                port,
                last_heartbeat: Instant::now(),
            },
        );
    }

    pub async fn endpoint_hint(&self, user_id: i64) -> Option<EndpointHint> {
        self.inner.endpoint_by_user.read().await.get(&user_id).copied()
    }

    /// Drops endpoint hints whose last heartbeat is older than
    /// `heartbeat_timeout` (§4.D `prune`). Live-connection liveness itself
    /// is governed by the transport and the reader's own timeouts, not by
    /// this sweep.
    pub async fn prune(&self, heartbeat_timeout: Duration) {
        let mut endpoints = self.inner.endpoint_by_user.write().await;
        endpoints.retain(|_, hint| hint.last_heartbeat.elapsed() < heartbeat_timeout);
    }

    /// Snapshot of `(username, online)` pairs for `get_directory` (§4.E).
    pub async fn snapshot(&self) -> Vec<(String, bool)> {
        let by_username = self.inner.conns_by_username.read().await;
        by_username
            .iter()
            .map(|(name, set)| (name.clone(), !set.is_empty()))
            .collect()
    }

    /// All currently-live connection ids, for shutdown broadcast (§4.G).
    pub async fn all_connection_ids(&self) -> Vec<ConnectionId> {
        self.inner.conn_by_id.read().await.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn loopback() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    async fn register(dir: &Directory, addr: IpAddr) -> Result<(ConnectionId, Arc<ConnectionHandle>), DirectoryError> {
        let (writer_tx, _writer_rx) = mpsc::channel(8);
        let (kill_tx, _kill_rx) = mpsc::channel(1);
        dir.register_connection(addr, writer_tx, kill_tx).await
    }

    #[tokio::test]
    async fn register_then_authenticate_makes_connection_discoverable_by_username() {
        let dir = Directory::new(100, 10, 10);
        let (cid, _handle) = register(&dir, loopback()).await.expect("register");

        assert!(dir.sessions_for_user("alice").await.is_empty());
        assert!(!dir.is_online("alice").await);

        dir.authenticate_connection(cid, 1, "alice").await.expect("authenticate");
        assert!(dir.is_online("alice").await);
        assert_eq!(dir.sessions_for_user("alice").await.len(), 1);
    }

    #[tokio::test]
    async fn drop_connection_removes_every_cross_reference() {
        let dir = Directory::new(100, 10, 10);
        let (cid, _handle) = register(&dir, loopback()).await.expect("register");
        dir.authenticate_connection(cid, 7, "bob").await.expect("authenticate");

        dir.drop_connection(cid).await;

        assert!(!dir.is_online("bob").await);
        assert!(dir.sessions_for_user("bob").await.is_empty());
        assert!(dir.connection(cid).await.is_none());
    }

    #[tokio::test]
    async fn per_user_connection_cap_rejects_further_authentications() {
        let dir = Directory::new(100, 10, 1);
        let (cid1, _h1) = register(&dir, loopback()).await.expect("register");
        dir.authenticate_connection(cid1, 5, "carol").await.expect("first login");

        let (cid2, _h2) = register(&dir, loopback()).await.expect("register second");
        let err = dir
            .authenticate_connection(cid2, 5, "carol")
            .await
            .expect_err("should hit the per-user cap");
        assert_eq!(err, DirectoryError::UserSessionLimit);
    }

    #[tokio::test]
    async fn per_ip_connection_cap_rejects_further_registrations() {
        let dir = Directory::new(100, 1, 10);
        register(&dir, loopback()).await.expect("first connection from ip");

        let err = register(&dir, loopback())
            .await
            .expect_err("should hit the per-ip cap");
        assert_eq!(err, DirectoryError::IpLimit);
    }

    #[tokio::test]
    async fn server_busy_rejects_once_max_connections_reached() {
        let dir = Directory::new(1, 10, 10);
        register(&dir, loopback()).await.expect("first connection");

        let err = register(&dir, loopback()).await.expect_err("should hit server_busy");
        assert_eq!(err, DirectoryError::ServerBusy);
    }

    #[tokio::test]
    async fn force_close_signals_the_kill_channel() {
        let (writer_tx, _writer_rx) = mpsc::channel(8);
        let (kill_tx, mut kill_rx) = mpsc::channel(1);
        let handle = ConnectionHandle::new(1, loopback(), writer_tx, kill_tx);

        handle.force_close();

        assert!(handle.should_close.load(Ordering::Relaxed));
        assert!(kill_rx.try_recv().is_ok());
    }
}
