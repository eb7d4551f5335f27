//! [`Protocol`] — the per-downstream EPP session state machine.
//!
//! ```text
//!   Connected ──greeting──▶ Greeted ──login ok──▶ LoggedIn ──logout──▶ (done)
//!                            │   ▲                  │   ▲
//!                            └───┘ not login,       └───┘ any other command,
//!                                  login failed           relayed upstream
//! ```
//!
//! Downstream I/O errors end the session as-is. Upstream failures come back
//! as [`EppError::RetryableUpstream`] carrying the unanswered command, so the
//! handler can bind a fresh upstream and call [`Protocol::resume`].
//!
//! The accepted login is kept for the life of the downstream session. A
//! replayed command is preceded by that login on the replacement upstream,
//! which is a cache hit when the pooled connection is already logged in.

use tokio::io::{AsyncRead, AsyncWrite};

// ---

use epplb_domain::{read_frame, response, write_frame, EppError, Message, Result};

// ---

use super::UpstreamSession;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    // ---
    /// Nothing sent downstream yet; the greeting is next.
    Connected,

    /// Greeting relayed; only `login` is accepted.
    Greeted,

    /// Login relayed; commands are forwarded upstream.
    LoggedIn,
}

// ---------------------------------------------------------------------------
// Protocol
// ---------------------------------------------------------------------------

pub struct Protocol<D> {
    // ---
    upstream: UpstreamSession,
    downstream: D,

    /// Login command the upstream accepted for this downstream session.
    login: Option<Message>,
}

// ---

impl<D> Protocol<D>
where
    D: AsyncRead + AsyncWrite + Unpin,
{
    // ---
    pub fn new(upstream: UpstreamSession, downstream: D) -> Self {
        Self {
            upstream,
            downstream,
            login: None,
        }
    }

    /// Swap in a replacement upstream after a failure.
    pub fn rebind(&mut self, upstream: UpstreamSession) {
        self.upstream = upstream;
    }

    // ---

    /// Run the session from the start.
    pub async fn talk(&mut self) -> Result<()> {
        self.run(Some(State::Connected)).await
    }

    // ---

    /// Re-enter the machine at the transition that `failed` was taking
    /// when the previous upstream died.
    pub async fn resume(&mut self, failed: Option<Message>) -> Result<()> {
        // ---
        let Some(cmd) = failed else {
            return self.talk().await;
        };

        let next = match cmd.command() {
            "login" => self.login(cmd).await?,
            "logout" => {
                self.send(&cmd.make_success_response()).await?;
                None
            }
            _ => {
                self.reauthenticate(&cmd).await?;
                self.relay(cmd).await?
            }
        };

        self.run(next).await
    }

    // ---

    async fn run(&mut self, mut state: Option<State>) -> Result<()> {
        // ---
        while let Some(current) = state {
            state = self.step(current).await?;
        }
        Ok(())
    }

    // ---

    /// Perform one transition out of `state`. `None` means the session is over.
    pub async fn step(&mut self, state: State) -> Result<Option<State>> {
        // ---
        match state {
            State::Connected => {
                let greeting = self
                    .upstream
                    .connect()
                    .await
                    .map_err(|e| EppError::retryable(e, None))?;

                self.send(&greeting).await?;
                Ok(Some(State::Greeted))
            }

            State::Greeted => {
                let cmd = self.receive().await?;

                if !cmd.is_command("login") {
                    tracing::debug!(cmd = cmd.command(), "command before login rejected");
                    let reply = cmd.make_error_response(&"unauthorized");
                    self.send(&reply).await?;
                    return Ok(Some(State::Greeted));
                }

                self.login(cmd).await
            }

            State::LoggedIn => {
                let cmd = self.receive().await?;

                if cmd.is_command("logout") {
                    self.send(&cmd.make_success_response()).await?;
                    return Ok(None);
                }

                self.relay(cmd).await
            }
        }
    }

    // ---

    async fn login(&mut self, cmd: Message) -> Result<Option<State>> {
        // ---
        match self.upstream.login(&cmd).await {
            Ok(accepted) => {
                let reply = answer_for(accepted, &cmd);
                self.send(&reply).await?;
                self.login = Some(cmd);
                Ok(Some(State::LoggedIn))
            }
            Err(EppError::LoginFailed { reason, response }) => {
                tracing::info!(%reason, "upstream rejected login");
                self.send(&response).await?;
                Ok(Some(State::Greeted))
            }
            Err(e) => Err(EppError::retryable(e, Some(cmd))),
        }
    }

    // ---

    /// Log the current upstream in with the saved login before `cmd` is
    /// replayed on it.
    async fn reauthenticate(&mut self, cmd: &Message) -> Result<()> {
        // ---
        let Some(saved) = &self.login else {
            return Ok(());
        };

        match self.upstream.login(saved).await {
            Ok(_) => Ok(()),
            Err(e) => Err(EppError::retryable(e, Some(cmd.clone()))),
        }
    }

    // ---

    async fn relay(&mut self, cmd: Message) -> Result<Option<State>> {
        // ---
        let response = match self.upstream.request(&cmd).await {
            Ok(r) => r,
            Err(e) => return Err(EppError::retryable(e, Some(cmd))),
        };

        self.send(&response).await?;
        Ok(Some(State::LoggedIn))
    }

    // ---

    async fn receive(&mut self) -> Result<Message> {
        read_frame(&mut self.downstream).await.map(Message::from)
    }

    async fn send(&mut self, msg: &Message) -> Result<()> {
        write_frame(&mut self.downstream, &msg.to_frame()).await
    }
}

// ---

/// A login response fit for `cmd`. A cached response from an earlier
/// downstream session is re-rendered with this command's clTRID.
fn answer_for(accepted: Message, cmd: &Message) -> Message {
    // ---
    let cl_trid = cmd.client_transaction_id();
    if accepted.client_transaction_id() == cl_trid {
        return accepted;
    }

    match accepted.result() {
        Ok(result) => response(result.code, &result.msg, cl_trid),
        Err(_) => accepted,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
