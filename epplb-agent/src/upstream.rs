//! [`UpstreamSession`] — one pooled EPP connection to the registry.
//!
//! # Caching
//!
//! The greeting and a successful login response are cached for the life of
//! the connection. When the pool hands the same connection to the next
//! downstream client, its `connect()` and `login()` are answered from the
//! cache without touching the wire.
//!
//! # Exclusion
//!
//! Every exchange (request, login, keepalive hello, logout) holds the
//! connection lock across its write *and* its read, so responses can never
//! interleave. The keepalive timer goes through the same lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

// ---

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

// ---

use epplb_domain::{
    // ---
    read_frame,
    write_frame,
    DuplexPtr,
    EppError,
    Message,
    Result,
};

// ---------------------------------------------------------------------------
// Conn
// ---------------------------------------------------------------------------

/// State guarded by the exchange lock.
struct Conn {
    // ---
    /// `None` once closed.
    stream: Option<DuplexPtr>,
    greeting: Option<Message>,
    login_response: Option<Message>,
}

// ---

impl Conn {
    // ---
    fn stream(&mut self) -> Result<&mut DuplexPtr> {
        self.stream
            .as_mut()
            .ok_or_else(|| EppError::upstream(EppError::SessionClosed))
    }

    // ---

    async fn ensure_greeting(&mut self) -> Result<Message> {
        // ---
        if let Some(greeting) = &self.greeting {
            return Ok(greeting.clone());
        }

        let frame = read_frame(self.stream()?).await.map_err(EppError::upstream)?;
        let greeting = Message::from(frame);
        self.greeting = Some(greeting.clone());

        Ok(greeting)
    }

    // ---

    /// Write `msg` and read exactly one response.
    ///
    /// The greeting is consumed first if nobody has read it yet, so a
    /// command replayed on a fresh connection never gets the greeting back
    /// as its answer.
    async fn exchange(&mut self, msg: &Message) -> Result<Message> {
        // ---
        self.ensure_greeting().await?;

        let stream = self.stream()?;
        write_frame(stream, &msg.to_frame())
            .await
            .map_err(EppError::upstream)?;
        let frame = read_frame(stream).await.map_err(EppError::upstream)?;

        Ok(Message::from(frame))
    }
}

// ---------------------------------------------------------------------------
// Inner
// ---------------------------------------------------------------------------

struct Inner {
    // ---
    id: Uuid,
    conn: Mutex<Conn>,

    /// Set after any failed exchange. A broken session is never recycled.
    broken: AtomicBool,

    /// Time of the last exchange, read by the keepalive timer.
    last_op: std::sync::Mutex<Instant>,

    keepalive: std::sync::Mutex<Option<JoinHandle<()>>>,
}

// ---

impl Inner {
    // ---
    fn touch(&self) {
        *self.last_op.lock().unwrap() = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_op.lock().unwrap().elapsed()
    }

    fn stop_keepalive(&self) {
        if let Some(handle) = self.keepalive.lock().unwrap().take() {
            handle.abort();
        }
    }

    // ---

    async fn exchange_locked(&self, conn: &mut Conn, msg: &Message) -> Result<Message> {
        // ---
        let result = conn.exchange(msg).await;
        self.touch();
        if result.is_err() {
            self.broken.store(true, Ordering::SeqCst);
        }
        result
    }
}

// ---

impl Drop for Inner {
    fn drop(&mut self) {
        if let Ok(slot) = self.keepalive.get_mut() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// UpstreamSession
// ---------------------------------------------------------------------------

/// Cheap-clone handle to one upstream connection.
///
/// Clones share the connection, the caches and the exchange lock.
#[derive(Clone)]
pub struct UpstreamSession {
    // ---
    inner: Arc<Inner>,
}

// ---

impl UpstreamSession {
    // ---
    /// Wrap `stream`. With `keepalive` set, a timer task sends `<hello/>`
    /// whenever the connection has been idle for a full interval.
    ///
    /// Must be called from within a tokio runtime when `keepalive` is set.
    pub fn new(stream: DuplexPtr, keepalive: Option<Duration>) -> Self {
        // ---
        let inner = Arc::new(Inner {
            id: Uuid::new_v4(),
            conn: Mutex::new(Conn {
                stream: Some(stream),
                greeting: None,
                login_response: None,
            }),
            broken: AtomicBool::new(false),
            last_op: std::sync::Mutex::new(Instant::now()),
            keepalive: std::sync::Mutex::new(None),
        });

        if let Some(interval) = keepalive.filter(|d| !d.is_zero()) {
            let handle = spawn_keepalive(Arc::downgrade(&inner), interval);
            *inner.keepalive.lock().unwrap() = Some(handle);
        }

        Self { inner }
    }

    // ---

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// True once an exchange has failed or the session was closed.
    pub fn is_broken(&self) -> bool {
        self.inner.broken.load(Ordering::SeqCst)
    }

    // ---

    /// Read the server greeting, once. Later calls return the cached copy.
    pub async fn connect(&self) -> Result<Message> {
        // ---
        let mut conn = self.inner.conn.lock().await;
        let result = conn.ensure_greeting().await;
        if result.is_err() {
            self.inner.broken.store(true, Ordering::SeqCst);
        }
        result
    }

    // ---

    /// Send `msg` and wait for its response.
    ///
    /// Blocks while another exchange is in flight on this connection.
    pub async fn request(&self, msg: &Message) -> Result<Message> {
        // ---
        let mut conn = self.inner.conn.lock().await;
        self.inner.exchange_locked(&mut conn, msg).await
    }

    // ---

    /// Log in with `msg`, or return the cached response of an earlier
    /// successful login on this connection.
    ///
    /// A failure result (code >= 2000) is returned as
    /// [`EppError::LoginFailed`] and is not cached.
    pub async fn login(&self, msg: &Message) -> Result<Message> {
        // ---
        let mut conn = self.inner.conn.lock().await;
        if let Some(cached) = &conn.login_response {
            return Ok(cached.clone());
        }

        let response = self.inner.exchange_locked(&mut conn, msg).await?;

        if response.is_failure() {
            let reason = response.result().map(|r| r.msg).unwrap_or_default();
            return Err(EppError::LoginFailed { reason, response });
        }

        conn.login_response = Some(response.clone());
        Ok(response)
    }

    // ---

    pub async fn is_logged_in(&self) -> bool {
        self.inner.conn.lock().await.login_response.is_some()
    }

    // ---

    /// Send a `<hello/>`. Used for keepalives.
    pub async fn hello(&self) -> Result<Message> {
        self.request(&Message::make_hello()).await
    }

    // ---

    /// End the EPP session upstream and release the connection.
    pub async fn logout(&self) -> Result<Message> {
        // ---
        self.inner.stop_keepalive();

        let response = self.request(&Message::make_logout()).await;
        self.close().await;
        response
    }

    // ---

    /// Shut the transport down. Idempotent.
    pub async fn close(&self) {
        // ---
        self.inner.stop_keepalive();
        self.inner.broken.store(true, Ordering::SeqCst);

        let mut conn = self.inner.conn.lock().await;
        if let Some(mut stream) = conn.stream.take() {
            stream.shutdown().await.ok();
            tracing::debug!(upstream = %self.inner.id, "upstream connection closed");
        }
    }
}

// ---------------------------------------------------------------------------
// Keepalive
// ---------------------------------------------------------------------------

/// Spawn the keepalive timer for one session.
///
/// The task holds only a weak reference and exits once the session is
/// dropped or a hello fails.
fn spawn_keepalive(inner: Weak<Inner>, interval: Duration) -> JoinHandle<()> {
    // ---
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let Some(inner) = inner.upgrade() else {
                break;
            };

            let mut conn = inner.conn.lock().await;

            // Re-check under the lock: a request may have finished while we waited.
            let idle = inner.idle_for();
            if idle < interval {
                continue;
            }

            tracing::debug!(upstream = %inner.id, idle_ms = idle.as_millis() as u64, "sending keepalive");

            if let Err(e) = inner.exchange_locked(&mut conn, &Message::make_hello()).await {
                tracing::warn!(upstream = %inner.id, "keepalive failed: {e}");
                break;
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use std::sync::Arc;

    use epplb_domain::ConnectionFactory;
    use epplb_link_sim::{LinkSimConfig, LinkSimFactory, LinkSimStats};

    use super::*;
    use crate::testing::{info, login};

    async fn session(config: LinkSimConfig, keepalive: Option<Duration>) -> (UpstreamSession, Arc<LinkSimStats>) {
        // ---
        let factory = LinkSimFactory::new(config);
        let stream = factory.create().await.unwrap();
        (UpstreamSession::new(stream, keepalive), factory.stats())
    }

    // ---

    #[tokio::test]
    async fn connect_is_cached() {
        // ---
        let (s, stats) = session(LinkSimConfig::perfect(), None).await;

        let first = s.connect().await.unwrap();
        let second = s.connect().await.unwrap();

        assert!(first.text().contains("<greeting>"));
        assert!(first.ptr_eq(&second));
        assert_eq!(stats.frames(), 0);
    }

    // ---

    #[tokio::test]
    async fn second_login_is_served_from_cache() {
        // ---
        let (s, stats) = session(LinkSimConfig::perfect(), None).await;
        s.connect().await.unwrap();

        let first = s.login(&login("L-1")).await.unwrap();
        let second = s.login(&login("L-2")).await.unwrap();

        assert!(first.is_success());
        assert!(first.ptr_eq(&second));
        assert_eq!(stats.frames(), 1);
        assert_eq!(stats.logins(), 1);
        assert!(s.is_logged_in().await);
    }

    // ---

    #[tokio::test]
    async fn failed_login_is_not_cached() {
        // ---
        let config = LinkSimConfig {
            reject_login: true,
            ..Default::default()
        };
        let (s, stats) = session(config, None).await;

        let err = s.login(&login("L-1")).await.unwrap_err();
        match err {
            EppError::LoginFailed { reason, response } => {
                assert_eq!(reason, "Authentication error");
                assert_eq!(response.result().unwrap().code, 2200);
            }
            other => panic!("unexpected {other:?}"),
        }

        assert!(s.login(&login("L-2")).await.is_err());
        assert_eq!(stats.logins(), 2);
        assert!(!s.is_broken());
        assert!(!s.is_logged_in().await);
    }

    // ---

    #[tokio::test]
    async fn request_without_connect_skips_greeting() {
        // ---
        let (s, _) = session(LinkSimConfig::perfect(), None).await;

        // Not logged in, so the upstream answers with a use error.
        let resp = s.request(&info("I-9")).await.unwrap();
        assert_eq!(resp.client_transaction_id(), "I-9");
        assert_eq!(resp.result().unwrap().code, 2002);

        s.login(&login("L-9")).await.unwrap();
        assert!(s.request(&info("I-10")).await.unwrap().is_success());
    }

    // ---

    #[tokio::test]
    async fn dead_upstream_is_upstream_error() {
        // ---
        let (s, _) = session(LinkSimConfig::dead(), None).await;

        let err = s.connect().await.unwrap_err();
        assert!(matches!(err, EppError::Upstream(_)));
        assert!(s.is_broken());
    }

    // ---

    #[tokio::test]
    async fn concurrent_requests_do_not_interleave() {
        // ---
        let config = LinkSimConfig {
            response_delay: Some(Duration::from_millis(5)),
            ..Default::default()
        };
        let (s, stats) = session(config, None).await;

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let s = s.clone();
                tokio::spawn(async move {
                    let id = format!("C-{i}");
                    let resp = s.request(&info(&id)).await.unwrap();
                    assert_eq!(resp.client_transaction_id(), id);
                })
            })
            .collect();

        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(stats.frames(), 8);
    }

    // ---

    #[tokio::test]
    async fn keepalive_fires_when_idle() {
        // ---
        let (s, stats) = session(LinkSimConfig::perfect(), Some(Duration::from_millis(40))).await;
        s.connect().await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(stats.hellos() >= 1);
        assert!(!s.is_broken());
    }

    // ---

    #[tokio::test]
    async fn keepalive_waits_while_busy() {
        // ---
        let config = LinkSimConfig {
            response_delay: Some(Duration::from_millis(10)),
            ..Default::default()
        };
        let (s, stats) = session(config, Some(Duration::from_millis(100))).await;
        s.login(&login("L-1")).await.unwrap();

        // Back-to-back traffic for well over one interval.
        for i in 0..20 {
            let id = format!("B-{i}");
            let resp = s.request(&info(&id)).await.unwrap();
            assert_eq!(resp.client_transaction_id(), id);
            assert!(resp.is_success());
        }

        assert_eq!(stats.hellos(), 0);
    }

    // ---

    #[tokio::test]
    async fn keepalive_between_requests_keeps_responses_paired() {
        // ---
        let config = LinkSimConfig {
            response_delay: Some(Duration::from_millis(5)),
            ..Default::default()
        };
        let (s, stats) = session(config, Some(Duration::from_millis(30))).await;
        s.login(&login("L-1")).await.unwrap();

        let tasks: Vec<_> = (0..3)
            .map(|t| {
                let s = s.clone();
                tokio::spawn(async move {
                    for i in 0..4 {
                        tokio::time::sleep(Duration::from_millis(45)).await;
                        let id = format!("K-{t}-{i}");
                        let resp = s.request(&info(&id)).await.unwrap();
                        assert_eq!(resp.client_transaction_id(), id);
                        assert!(resp.is_success());
                    }
                })
            })
            .collect();

        for t in tasks {
            t.await.unwrap();
        }

        assert!(stats.hellos() >= 1);
        assert!(!s.is_broken());
    }

    // ---

    #[tokio::test]
    async fn hello_returns_fresh_greeting() {
        // ---
        let (s, stats) = session(LinkSimConfig::perfect(), None).await;
        let cached = s.connect().await.unwrap();

        let fresh = s.hello().await.unwrap();
        assert!(fresh.text().contains("<greeting>"));
        assert!(!fresh.ptr_eq(&cached));
        assert_eq!(stats.hellos(), 1);
    }

    // ---

    #[tokio::test]
    async fn close_is_idempotent() {
        // ---
        let (s, _) = session(LinkSimConfig::perfect(), None).await;

        s.close().await;
        s.close().await;

        let err = s.request(&info("I-1")).await.unwrap_err();
        match err {
            EppError::Upstream(inner) => assert!(matches!(*inner, EppError::SessionClosed)),
            other => panic!("unexpected {other:?}"),
        }
    }

    // ---

    #[tokio::test]
    async fn logout_ends_upstream_session() {
        // ---
        let (s, stats) = session(LinkSimConfig::perfect(), None).await;
        s.login(&login("L-1")).await.unwrap();

        let resp = s.logout().await.unwrap();
        assert_eq!(resp.result().unwrap().code, 1500);
        assert_eq!(stats.logouts(), 1);
        assert!(s.is_broken());
    }
}
