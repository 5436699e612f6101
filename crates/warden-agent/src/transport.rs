//! Newline-delimited JSON message transport.
//!
//! Each inbound line is one frame:
//!
//! ```text
//! {"kind":"request","args":{"id":{"str":"abc"},"src-port":{"int":40000},"body":{"bin":"aGk="}}}
//! ```
//!
//! and each answer is the verdict on its own line:
//!
//! ```text
//! {"vars":[{"name":"fail","value":{"int":0}},{"name":"id","value":{"str":"abc"}}]}
//! ```
//!
//! Frames are answered in order. A frame that cannot be parsed is answered
//! with an error verdict and the connection stays open.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, warn};
use warden_core::{Args, MessageKind, Verdict};

use crate::agent::Agent;
use crate::error::AgentResult;

/// One inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Message kind.
    pub kind: MessageKind,
    /// Message arguments.
    #[serde(default)]
    pub args: Args,
}

impl Frame {
    /// Create a frame.
    pub fn new(kind: MessageKind, args: Args) -> Self {
        Self { kind, args }
    }
}

/// Serve frames from `stream` until EOF or shutdown.
///
/// Shutdown is observed between frames; a frame being handled is always
/// answered.
///
/// # Errors
///
/// Returns an I/O error if reading or writing the stream fails.
pub async fn serve_connection<S>(
    agent: &Agent,
    stream: S,
    mut shutdown: watch::Receiver<bool>,
) -> AgentResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();
    let mut frames = 0_u64;

    loop {
        let stopping = *shutdown.borrow();
        if stopping {
            break;
        }

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = shutdown.changed() => break,
        };
        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let verdict = match serde_json::from_str::<Frame>(&line) {
            Ok(frame) => agent.handle(frame.kind, &frame.args),
            Err(e) => {
                warn!(error = %e, "malformed frame");
                Verdict::error()
            }
        };

        let mut out = serde_json::to_vec(&verdict)?;
        out.push(b'\n');
        writer.write_all(&out).await?;
        writer.flush().await?;
        frames += 1;
    }

    debug!(frames, "connection finished");
    Ok(())
}
