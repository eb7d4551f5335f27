//! Shared fixtures for the agent's unit tests.

use tokio::io::{AsyncRead, AsyncWrite};

use epplb_domain::{read_frame, write_frame, Message, NS_EPP10};

// ---

fn command(body: &str, cl_trid: &str) -> Message {
    Message::new(format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"no\"?>\n\
         <epp xmlns=\"{NS_EPP10}\">\n  <command>\n    {body}\n    <clTRID>{cl_trid}</clTRID>\n  </command>\n</epp>"
    ))
}

pub fn login(cl_trid: &str) -> Message {
    command(
        "<login><clID>ClientX</clID><pw>foo-BAR2</pw><options><version>1.0</version><lang>en</lang></options></login>",
        cl_trid,
    )
}

pub fn logout(cl_trid: &str) -> Message {
    command("<logout/>", cl_trid)
}

pub fn info(cl_trid: &str) -> Message {
    command(
        "<info><domain:info xmlns:domain=\"urn:ietf:params:xml:ns:domain-1.0\"><domain:name>example.com</domain:name></domain:info></info>",
        cl_trid,
    )
}

// ---

/// Write `msg` as one frame from the client side of a downstream pipe.
pub async fn send<S>(stream: &mut S, msg: &Message)
where
    S: AsyncWrite + Unpin,
{
    write_frame(stream, &msg.to_frame()).await.unwrap();
}

/// Read one frame on the client side of a downstream pipe.
pub async fn recv<S>(stream: &mut S) -> Message
where
    S: AsyncRead + Unpin,
{
    Message::from(read_frame(stream).await.unwrap())
}
