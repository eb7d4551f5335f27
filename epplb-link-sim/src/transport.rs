use std::sync::Arc;

use async_trait::async_trait;

use epplb_domain::{ConnectionFactory, DuplexPtr, EppError, Result};

use super::config::LinkSimConfig;
use super::server::{serve, LinkSimStats, Script};

/// Buffer size of each in-process pipe.
const PIPE_CAPACITY: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// LinkSimFactory
// ---------------------------------------------------------------------------

/// In-process mock upstream. Does not use real sockets.
///
/// Every `create()` returns one end of a [`tokio::io::duplex`] pipe and
/// spawns the scripted server on the other end.
pub struct LinkSimFactory {
    // ---
    script: Arc<Script>,
}

// ---

impl LinkSimFactory {
    // ---
    pub fn new(config: LinkSimConfig) -> Self {
        Self {
            script: Arc::new(Script::new(config)),
        }
    }

    // ---

    /// Counters shared by every connection this factory has produced.
    pub fn stats(&self) -> Arc<LinkSimStats> {
        self.script.stats.clone()
    }
}

// ---

#[async_trait]
impl ConnectionFactory for LinkSimFactory {
    // ---
    async fn create(&self) -> Result<DuplexPtr> {
        // ---
        if self.script.config.refuse_connections {
            return Err(EppError::Transport("link-sim: connection refused".into()));
        }

        let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);
        self.script.stats.connected();
        tokio::spawn(serve(remote, self.script.clone()));

        Ok(Box::new(local))
    }

    // ---

    fn describe(&self) -> String {
        "link-sim".into()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use epplb_domain::{read_frame, write_frame, Message};

    use super::*;

    const LOGIN: &str = r#"<epp xmlns="urn:ietf:params:xml:ns:epp-1.0"><command><login><clID>c</clID></login><clTRID>L-1</clTRID></command></epp>"#;
    const INFO: &str = r#"<epp xmlns="urn:ietf:params:xml:ns:epp-1.0"><command><info/><clTRID>I-1</clTRID></command></epp>"#;

    async fn exchange(stream: &mut DuplexPtr, msg: &str) -> Result<Message> {
        write_frame(stream, &Message::from(msg.to_string()).to_frame()).await?;
        Ok(Message::from(read_frame(stream).await?))
    }

    // ---

    #[tokio::test]
    async fn perfect_link_greets_and_answers() {
        // ---
        let factory = LinkSimFactory::new(LinkSimConfig::perfect());
        let mut s = factory.create().await.unwrap();

        let greeting = Message::from(read_frame(&mut s).await.unwrap());
        assert!(greeting.text().contains("<greeting>"));

        let resp = exchange(&mut s, LOGIN).await.unwrap();
        assert!(resp.is_success());
        assert_eq!(resp.client_transaction_id(), "L-1");

        let resp = exchange(&mut s, INFO).await.unwrap();
        assert_eq!(resp.client_transaction_id(), "I-1");

        let stats = factory.stats();
        assert_eq!(stats.connections(), 1);
        assert_eq!(stats.frames(), 2);
        assert_eq!(stats.logins(), 1);
    }

    // ---

    #[tokio::test]
    async fn command_before_login_is_use_error() {
        // ---
        let factory = LinkSimFactory::new(LinkSimConfig::perfect());
        let mut s = factory.create().await.unwrap();
        read_frame(&mut s).await.unwrap();

        let resp = exchange(&mut s, INFO).await.unwrap();
        assert_eq!(resp.result().unwrap().code, 2002);
        assert_eq!(resp.client_transaction_id(), "I-1");

        exchange(&mut s, LOGIN).await.unwrap();
        assert!(exchange(&mut s, INFO).await.unwrap().is_success());

        // Login state is per connection.
        let mut other = factory.create().await.unwrap();
        read_frame(&mut other).await.unwrap();
        assert!(exchange(&mut other, INFO).await.unwrap().is_failure());
    }

    // ---

    #[tokio::test]
    async fn flaky_login_budget_spans_connections() {
        // ---
        let factory = LinkSimFactory::new(LinkSimConfig::flaky_login(1));

        let mut first = factory.create().await.unwrap();
        read_frame(&mut first).await.unwrap();
        assert!(exchange(&mut first, LOGIN).await.is_err());

        let mut second = factory.create().await.unwrap();
        read_frame(&mut second).await.unwrap();
        assert!(exchange(&mut second, LOGIN).await.unwrap().is_success());
    }

    // ---

    #[tokio::test]
    async fn dead_link_hangs_up_before_greeting() {
        // ---
        let factory = LinkSimFactory::new(LinkSimConfig::dead());
        let mut s = factory.create().await.unwrap();
        assert!(matches!(
            read_frame(&mut s).await,
            Err(EppError::Disconnected)
        ));
    }

    // ---

    #[tokio::test]
    async fn refusing_link_fails_create() {
        // ---
        let factory = LinkSimFactory::new(LinkSimConfig::refusing());
        assert!(factory.create().await.is_err());
        assert_eq!(factory.stats().connections(), 0);
    }

    // ---

    #[tokio::test]
    async fn rejected_login_is_failure_code() {
        // ---
        let factory = LinkSimFactory::new(LinkSimConfig {
            reject_login: true,
            ..Default::default()
        });
        let mut s = factory.create().await.unwrap();
        read_frame(&mut s).await.unwrap();

        let resp = exchange(&mut s, LOGIN).await.unwrap();
        assert!(resp.is_failure());
        assert_eq!(resp.result().unwrap().code, 2200);
    }

    // ---

    #[tokio::test]
    async fn seeded_drop_percent_one_always_drops() {
        // ---
        let factory = LinkSimFactory::new(LinkSimConfig {
            drop_percent: 1.0,
            seed: Some(7),
            ..Default::default()
        });
        let mut s = factory.create().await.unwrap();
        read_frame(&mut s).await.unwrap();
        assert!(exchange(&mut s, LOGIN).await.unwrap().is_success());
        assert!(exchange(&mut s, INFO).await.is_err());
    }
}
