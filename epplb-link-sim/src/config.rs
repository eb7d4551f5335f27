use std::time::Duration;

// ---------------------------------------------------------------------------
// LinkSimConfig
// ---------------------------------------------------------------------------

/// Behaviour of the simulated upstream.
///
/// All fields default to a well-behaved server: greeting on connect, every
/// login accepted, every command after a login answered with code 1000.
/// Commands sent before a successful login on a connection get 2002.
#[derive(Debug, Clone, Default)]
pub struct LinkSimConfig {
    // ---
    /// `create()` fails outright, as if the upstream refused the TCP connection.
    pub refuse_connections: bool,

    /// The server hangs up before sending its greeting.
    pub drop_on_connect: bool,

    /// Number of login commands, counted across all connections from one
    /// factory, on which the server hangs up instead of answering.
    pub drop_logins: usize,

    /// Same as `drop_logins` for every other command.
    pub drop_commands: usize,

    /// Probability `[0.0, 1.0]` that a non-login command is answered by a
    /// hang-up. Applied after `drop_commands` is spent.
    pub drop_percent: f64,

    /// Answer login with code 2200 instead of 1000.
    pub reject_login: bool,

    /// Delay before each response is written.
    pub response_delay: Option<Duration>,

    /// RNG seed for reproducible `drop_percent` runs. `None` = random.
    pub seed: Option<u64>,
}

// ---

impl LinkSimConfig {
    // ---
    /// Well-behaved upstream. Useful as a baseline.
    pub fn perfect() -> Self {
        Self::default()
    }

    // ---

    /// The first `n` logins are answered by a hang-up.
    pub fn flaky_login(n: usize) -> Self {
        Self {
            drop_logins: n,
            ..Default::default()
        }
    }

    // ---

    /// The first `n` non-login commands are answered by a hang-up.
    pub fn flaky_commands(n: usize) -> Self {
        Self {
            drop_commands: n,
            ..Default::default()
        }
    }

    // ---

    /// Every connection dies before the greeting.
    pub fn dead() -> Self {
        Self {
            drop_on_connect: true,
            ..Default::default()
        }
    }

    // ---

    /// Every `create()` fails.
    pub fn refusing() -> Self {
        Self {
            refuse_connections: true,
            ..Default::default()
        }
    }
}
