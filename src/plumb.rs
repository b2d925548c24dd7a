use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::debug;

use crate::config::PlumbConfig;
use crate::ninep::{self, Client, OWRITE};

/// Sends a looked-at word somewhere else. Failures are the caller's to
/// report; they never end the session.
pub trait Plumber {
    fn plumb(&mut self, word: &str, wdir: &Path) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub src: String,
    pub dst: String,
    pub wdir: String,
    pub kind: String,
    pub data: Vec<u8>,
}

impl Message {
    /// Wire form: `src dst wdir type attr ndata` one per line, then the data.
    /// afz sets no attributes, so the attr line is always empty.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = format!(
            "{}\n{}\n{}\n{}\n\n{}\n",
            self.src,
            self.dst,
            self.wdir,
            self.kind,
            self.data.len()
        )
        .into_bytes();
        out.extend_from_slice(&self.data);
        out
    }
}

/// Plumbs through a port of the plumber's file server.
pub struct PlumbPort {
    ns: PathBuf,
    config: PlumbConfig,
}

impl PlumbPort {
    pub fn new(ns: PathBuf, config: PlumbConfig) -> Self {
        Self { ns, config }
    }

    pub fn message(&self, word: &str, wdir: &Path) -> Message {
        Message {
            src: self.config.src.clone(),
            dst: String::new(),
            wdir: wdir.display().to_string(),
            kind: self.config.content_type.clone(),
            data: word.as_bytes().to_vec(),
        }
    }
}

impl Plumber for PlumbPort {
    fn plumb(&mut self, word: &str, wdir: &Path) -> Result<()> {
        let message = self.message(word, wdir);
        let mut client = ninep::dial(&self.ns, "plumb").context("failed to connect to plumber")?;
        send(&mut client, &self.config.port, &message)?;
        debug!(target: "afz::plumb", "plumbed {word:?} from {}", message.wdir);
        Ok(())
    }
}

/// Opens `port`, writes `message` in a single write and closes the port.
/// The plumber reads one message per write, so a message that does not fit
/// in one is refused.
pub fn send<T: Read + Write>(client: &mut Client<T>, port: &str, message: &Message) -> Result<()> {
    let mut fid = client
        .open(port, OWRITE)
        .with_context(|| format!("plumb: open port {port}"))?;
    let encoded = message.encode();
    let limit = client.max_write(&fid);
    let sent = if encoded.len() > limit {
        Err(anyhow!(
            "plumb: message is {} bytes, port {port} takes at most {limit}",
            encoded.len()
        ))
    } else {
        client
            .write(&mut fid, &encoded)
            .context("plumb: send message")
    };
    let closed = client.clunk(fid).context("plumb: close port");
    sent?;
    closed
}
