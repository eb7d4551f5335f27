//! The scripted upstream that sits on the far end of every simulated link.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

// ---

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::io::DuplexStream;

// ---

use epplb_domain::{read_frame, response, write_frame, Message, NS_EPP10};

// ---

use super::LinkSimConfig;

// ---------------------------------------------------------------------------
// LinkSimStats
// ---------------------------------------------------------------------------

/// Counters observed by the simulated upstream, shared by every connection
/// of one factory.
#[derive(Debug, Default)]
pub struct LinkSimStats {
    // ---
    connections: AtomicUsize,
    frames: AtomicUsize,
    logins: AtomicUsize,
    logouts: AtomicUsize,
    hellos: AtomicUsize,
}

impl LinkSimStats {
    // ---
    /// Successful `create()` calls.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Frames received from the proxy, all kinds.
    pub fn frames(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }

    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn logouts(&self) -> usize {
        self.logouts.load(Ordering::SeqCst)
    }

    pub fn hellos(&self) -> usize {
        self.hellos.load(Ordering::SeqCst)
    }

    pub(crate) fn connected(&self) {
        self.connections.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Script
// ---------------------------------------------------------------------------

/// Fault budget and counters shared by all connections of one factory.
pub(crate) struct Script {
    // ---
    pub(crate) config: LinkSimConfig,
    pub(crate) stats: std::sync::Arc<LinkSimStats>,
    drop_logins: AtomicUsize,
    drop_commands: AtomicUsize,
    rng: Mutex<StdRng>,
}

// ---

impl Script {
    // ---
    pub(crate) fn new(config: LinkSimConfig) -> Self {
        // ---
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            drop_logins: AtomicUsize::new(config.drop_logins),
            drop_commands: AtomicUsize::new(config.drop_commands),
            stats: Default::default(),
            rng: Mutex::new(rng),
            config,
        }
    }

    // ---

    fn should_drop_command(&self) -> bool {
        // ---
        if take(&self.drop_commands) {
            return true;
        }
        if self.config.drop_percent <= 0.0 {
            return false;
        }
        let p = self.config.drop_percent.min(1.0);
        self.rng.lock().unwrap().gen_bool(p)
    }
}

// ---

/// Consume one unit of `budget`; false once it is spent.
fn take(budget: &AtomicUsize) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

// ---------------------------------------------------------------------------
// Canned documents
// ---------------------------------------------------------------------------

pub fn greeting() -> Message {
    // ---
    Message::new(format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"no\"?>\n\
         <epp xmlns=\"{NS_EPP10}\"><greeting><svID>link-sim</svID>\
         <svDate>2000-01-01T00:00:00.0Z</svDate>\
         <svcMenu><version>1.0</version><lang>en</lang></svcMenu>\
         </greeting></epp>"
    ))
}

// ---------------------------------------------------------------------------
// serve
// ---------------------------------------------------------------------------

/// Play the upstream role on `stream` until either side hangs up.
pub(crate) async fn serve(mut stream: DuplexStream, script: std::sync::Arc<Script>) {
    // ---
    if script.config.drop_on_connect {
        tracing::debug!("link-sim: hanging up before greeting");
        return;
    }

    if write_frame(&mut stream, &greeting().to_frame()).await.is_err() {
        return;
    }

    let mut logged_in = false;

    loop {
        let msg = match read_frame(&mut stream).await {
            Ok(frame) => Message::from(frame),
            Err(_) => return,
        };
        script.stats.frames.fetch_add(1, Ordering::SeqCst);

        let cl_trid = msg.client_transaction_id().to_string();
        let mut last = false;

        let reply = match msg.command() {
            "" if msg.text().contains("<hello") => {
                script.stats.hellos.fetch_add(1, Ordering::SeqCst);
                greeting()
            }
            "login" => {
                script.stats.logins.fetch_add(1, Ordering::SeqCst);
                if take(&script.drop_logins) {
                    tracing::debug!("link-sim: hanging up on login");
                    return;
                }
                if script.config.reject_login {
                    response(2200, "Authentication error", &cl_trid)
                } else {
                    logged_in = true;
                    response(1000, "Command completed successfully", &cl_trid)
                }
            }
            "logout" => {
                script.stats.logouts.fetch_add(1, Ordering::SeqCst);
                last = true;
                response(1500, "Command completed successfully; ending session", &cl_trid)
            }
            _ => {
                if script.should_drop_command() {
                    tracing::debug!(cmd = msg.command(), "link-sim: hanging up on command");
                    return;
                }
                if !logged_in {
                    response(2002, "Command use error", &cl_trid)
                } else {
                    response(1000, "Command completed successfully", &cl_trid)
                }
            }
        };

        if let Some(delay) = script.config.response_delay {
            tokio::time::sleep(delay).await;
        }

        if write_frame(&mut stream, &reply.to_frame()).await.is_err() || last {
            return;
        }
    }
}
