//! [`Message`] — the EPP view of one frame's payload.
//!
//! The payload is parsed at most once, on first access, and only the three
//! things the load balancer cares about are kept: the command name, the
//! client transaction id, and the response result. Synthetic responses
//! are new messages; the raw bytes of a message never change.

use std::fmt;
use std::sync::{Arc, OnceLock};

// ---

use bytes::Bytes;
use roxmltree::{Document, Node};

// ---

use super::error::{EppError, Result};
use super::frame::Frame;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const NS_EPP10: &str = "urn:ietf:params:xml:ns:epp-1.0";

/// Server transaction id stamped on responses the proxy makes up itself.
pub(crate) const SYNTHETIC_SVTRID: &str = "00000-ZZZ";

/// Client transaction id used for the proxy's own logout.
pub(crate) const SYNTHETIC_CLTRID: &str = "00000-AAA";

const XML_DECL: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="no"?>"#;

// ---------------------------------------------------------------------------
// EppResult
// ---------------------------------------------------------------------------

/// `<result code=".."><msg>..</msg></result>` from a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EppResult {
    pub code: u16,
    pub msg: String,
}

impl EppResult {
    pub fn is_success(&self) -> bool {
        (1000..2000).contains(&self.code)
    }

    pub fn is_failure(&self) -> bool {
        self.code >= 2000
    }
}

// ---------------------------------------------------------------------------
// Parsed
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResultShape {
    NotAResponse,
    MissingResult,
}

#[derive(Debug)]
struct Parsed {
    command: String,
    cl_trid: String,
    result: std::result::Result<EppResult, ResultShape>,
}

impl Default for Parsed {
    fn default() -> Self {
        Self {
            command: String::new(),
            cl_trid: String::new(),
            result: Err(ResultShape::NotAResponse),
        }
    }
}

// ---

impl Parsed {
    // ---
    fn from_bytes(raw: &[u8]) -> Self {
        // ---
        let text = match std::str::from_utf8(raw) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!("failed to parse xml; payload is not utf-8: {e}");
                return Self::default();
            }
        };

        let doc = match Document::parse(text) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!("failed to parse xml; {e}");
                return Self::default();
            }
        };

        let command_node = find(&doc, "command");

        // Skip whitespace and comments between <command> and the verb.
        let command = command_node
            .and_then(|n| n.children().find(|c| c.is_element()))
            .map(|n| n.tag_name().name().to_string())
            .unwrap_or_default();

        let cl_trid = match command_node {
            Some(cmd) => child_text(cmd, "clTRID"),
            None => find(&doc, "trID")
                .map(|tr| child_text(tr, "clTRID"))
                .unwrap_or_default(),
        };

        let result = match find(&doc, "response") {
            None => Err(ResultShape::NotAResponse),
            Some(resp) => match child(resp, "result") {
                None => Err(ResultShape::MissingResult),
                Some(r) => Ok(EppResult {
                    code: r
                        .attribute("code")
                        .and_then(|c| c.trim().parse().ok())
                        .unwrap_or(0),
                    msg: child_text(r, "msg"),
                }),
            },
        };

        Self {
            command,
            cl_trid,
            result,
        }
    }
}

// ---

fn find<'a, 'input>(doc: &'a Document<'input>, name: &str) -> Option<Node<'a, 'input>> {
    doc.descendants().find(|n| n.has_tag_name((NS_EPP10, name)))
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| n.has_tag_name((NS_EPP10, name)))
}

fn child_text(node: Node<'_, '_>, name: &str) -> String {
    child(node, name)
        .and_then(|n| n.text())
        .map(|t| t.trim().to_string())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Immutable view over one EPP document.
///
/// Clones are cheap and share both the bytes and the parse cache.
#[derive(Clone)]
pub struct Message {
    // ---
    raw: Bytes,
    parsed: Arc<OnceLock<Parsed>>,
}

// ---

impl Message {
    // ---
    pub fn new(raw: impl Into<Bytes>) -> Self {
        Self {
            raw: raw.into(),
            parsed: Arc::new(OnceLock::new()),
        }
    }

    /// Lossy UTF-8 rendering of the document, for logs and tests.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.raw).into_owned()
    }

    /// Frame to put this message on the wire.
    pub fn to_frame(&self) -> Frame {
        Frame::new(self.raw.clone())
    }

    /// True when both handles share one underlying buffer.
    pub fn ptr_eq(&self, other: &Message) -> bool {
        Arc::ptr_eq(&self.parsed, &other.parsed)
    }

    fn parsed(&self) -> &Parsed {
        self.parsed.get_or_init(|| Parsed::from_bytes(&self.raw))
    }

    // ---

    /// Local name of the first element under `<command>`, or `""`.
    pub fn command(&self) -> &str {
        &self.parsed().command
    }

    pub fn is_command(&self, name: &str) -> bool {
        self.command() == name
    }

    /// `command/clTRID` for commands, `response/trID/clTRID` for
    /// responses, `""` otherwise.
    pub fn client_transaction_id(&self) -> &str {
        &self.parsed().cl_trid
    }

    pub fn result(&self) -> Result<EppResult> {
        match &self.parsed().result {
            Ok(r) => Ok(r.clone()),
            Err(ResultShape::NotAResponse) => Err(EppError::NotAResponse),
            Err(ResultShape::MissingResult) => Err(EppError::MissingResult),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(&self.parsed().result, Ok(r) if r.is_success())
    }

    pub fn is_failure(&self) -> bool {
        matches!(&self.parsed().result, Ok(r) if r.is_failure())
    }

    // ---

    /// Generic code 1000 response echoing this message's clTRID.
    pub fn make_success_response(&self) -> Message {
        response(1000, "Command completed successfully", self.client_transaction_id())
    }

    /// Generic code 2400 response carrying `err` as its `<msg>`.
    pub fn make_error_response(&self, err: &dyn fmt::Display) -> Message {
        response(2400, &err.to_string(), self.client_transaction_id())
    }

    pub fn make_hello() -> Message {
        Message::new(format!(
            "{XML_DECL}\n<epp xmlns=\"{NS_EPP10}\"><hello/></epp>"
        ))
    }

    pub fn make_logout() -> Message {
        Message::new(format!(
            "{XML_DECL}\n<epp xmlns=\"{NS_EPP10}\"><command><logout/>\
             <clTRID>{SYNTHETIC_CLTRID}</clTRID></command></epp>"
        ))
    }
}

// ---

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        Message::new(frame.into_payload())
    }
}

impl From<&'static str> for Message {
    fn from(xml: &'static str) -> Self {
        Message::new(xml)
    }
}

impl From<String> for Message {
    fn from(xml: String) -> Self {
        Message::new(xml)
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("len", &self.raw.len())
            .field("command", &self.command())
            .field("cl_trid", &self.client_transaction_id())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Synthesis helpers
// ---------------------------------------------------------------------------

/// Render a minimal response document. `msg` and `cl_trid` are escaped.
pub fn response(code: u16, msg: &str, cl_trid: &str) -> Message {
    // ---
    Message::new(format!(
        "{XML_DECL}\n<epp xmlns=\"{NS_EPP10}\"><response>\
         <result code=\"{code}\"><msg>{msg}</msg></result>\
         <trID><clTRID>{cl_trid}</clTRID><svTRID>{SYNTHETIC_SVTRID}</svTRID></trID>\
         </response></epp>",
        msg = escape(msg),
        cl_trid = escape(cl_trid),
    ))
}

pub(crate) fn escape(text: &str) -> String {
    // ---
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
