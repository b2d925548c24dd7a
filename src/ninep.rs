//! A small synchronous 9P2000 client.
//!
//! Only what acme and the plumber need: version, attach, walk, open, read,
//! write and clunk. One request is in flight at a time, so every message
//! carries the same tag.

use std::env;
use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::trace;

pub const OWRITE: u8 = 1;
pub const ORDWR: u8 = 2;

const VERSION: &str = "9P2000";
const MSIZE: u32 = 8192 + IOHDRSZ;
const IOHDRSZ: u32 = 24;
const NOTAG: u16 = !0;
const NOFID: u32 = !0;
const TAG: u16 = 1;
const MAXWELEM: usize = 16;

const TVERSION: u8 = 100;
const TATTACH: u8 = 104;
const RERROR: u8 = 107;
const TWALK: u8 = 110;
const TOPEN: u8 = 112;
const TREAD: u8 = 116;
const TWRITE: u8 = 118;
const TCLUNK: u8 = 120;

#[derive(Debug, Error)]
pub enum NinepError {
    #[error("9p i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Server(String),

    #[error("unexpected 9p reply: expected type {expected}, got {actual}")]
    UnexpectedReply { expected: u8, actual: u8 },

    #[error("9p tag mismatch: sent {sent}, got {got}")]
    TagMismatch { sent: u16, got: u16 },

    #[error("9p message of {size} bytes exceeds msize {msize}")]
    TooLarge { size: u32, msize: u32 },

    #[error("malformed 9p message: {0}")]
    Malformed(&'static str),

    #[error("server speaks {0}, not {VERSION}")]
    Version(String),

    #[error("path {0:?} has too many elements")]
    PathTooLong(String),
}

pub type Result<T> = std::result::Result<T, NinepError>;

/// An open file on the server.
#[derive(Debug)]
pub struct Fid {
    id: u32,
    iounit: u32,
    offset: u64,
}

pub struct Client<T> {
    conn: T,
    msize: u32,
    root: u32,
    next_fid: u32,
}

/// Dials the service `name` (e.g. `acme`) in namespace directory `ns`.
pub fn dial(ns: &Path, name: &str) -> Result<Client<UnixStream>> {
    let path = ns.join(name);
    let conn = UnixStream::connect(&path).map_err(|err| {
        NinepError::Io(io::Error::new(
            err.kind(),
            format!("dial {}: {err}", path.display()),
        ))
    })?;
    Client::connect(conn, &user())
}

/// The plan9port namespace directory: `$NAMESPACE`, or
/// `/tmp/ns.$USER.$DISPLAY`.
pub fn namespace() -> PathBuf {
    if let Some(ns) = env::var_os("NAMESPACE") {
        return PathBuf::from(ns);
    }
    let display = env::var("DISPLAY").unwrap_or_else(|_| ":0".to_string());
    PathBuf::from(format!("/tmp/ns.{}.{}", user(), clean_display(&display)))
}

fn clean_display(display: &str) -> String {
    display.strip_suffix(".0").unwrap_or(display).replace('/', "_")
}

fn user() -> String {
    env::var("USER")
        .or_else(|_| env::var("LOGNAME"))
        .unwrap_or_else(|_| "none".to_string())
}

impl<T: Read + Write> Client<T> {
    pub fn connect(conn: T, uname: &str) -> Result<Self> {
        let mut client = Self {
            conn,
            msize: MSIZE,
            root: 0,
            next_fid: 1,
        };
        client.version()?;
        client.attach(uname)?;
        Ok(client)
    }

    fn version(&mut self) -> Result<()> {
        let mut req = Encoder::new();
        req.u32(self.msize).str(VERSION);
        let reply = self.rpc_tagged(TVERSION, NOTAG, req)?;
        let mut reply = Decoder::new(&reply);
        let msize = reply.u32()?;
        let version = reply.str()?;
        if version != VERSION {
            return Err(NinepError::Version(version));
        }
        self.msize = self.msize.min(msize);
        Ok(())
    }

    fn attach(&mut self, uname: &str) -> Result<()> {
        let mut req = Encoder::new();
        req.u32(self.root).u32(NOFID).str(uname).str("");
        self.rpc(TATTACH, req)?;
        Ok(())
    }

    /// Walks from the root to `path` and opens it with `mode`.
    pub fn open(&mut self, path: &str, mode: u8) -> Result<Fid> {
        let id = self.walk(path)?;
        let mut req = Encoder::new();
        req.u32(id).u8(mode);
        match self.rpc(TOPEN, req) {
            Ok(reply) => {
                let mut reply = Decoder::new(&reply);
                reply.skip(13)?;
                let iounit = reply.u32()?;
                Ok(Fid {
                    id,
                    iounit,
                    offset: 0,
                })
            }
            Err(err) => {
                let _ = self.clunk_id(id);
                Err(err)
            }
        }
    }

    fn walk(&mut self, path: &str) -> Result<u32> {
        let names: Vec<&str> = path.split('/').filter(|name| !name.is_empty()).collect();
        if names.len() > MAXWELEM {
            return Err(NinepError::PathTooLong(path.to_string()));
        }
        let id = self.next_fid;
        self.next_fid += 1;

        let mut req = Encoder::new();
        req.u32(self.root).u32(id).u16(names.len() as u16);
        for name in &names {
            req.str(name);
        }
        let reply = self.rpc(TWALK, req)?;
        let walked = Decoder::new(&reply).u16()? as usize;
        if walked != names.len() {
            return Err(NinepError::Server(format!("{path}: file does not exist")));
        }
        Ok(id)
    }

    /// Reads at most `count` bytes. An empty result means end of file.
    pub fn read(&mut self, fid: &mut Fid, count: usize) -> Result<Vec<u8>> {
        let count = (count as u32).min(self.max_io(fid));
        let mut req = Encoder::new();
        req.u32(fid.id).u64(fid.offset).u32(count);
        let reply = self.rpc(TREAD, req)?;
        let data = Decoder::new(&reply).bytes()?.to_vec();
        fid.offset += data.len() as u64;
        Ok(data)
    }

    /// Writes all of `data`, splitting it to fit the negotiated msize. An
    /// empty `data` still sends one zero-length write.
    pub fn write(&mut self, fid: &mut Fid, data: &[u8]) -> Result<()> {
        let chunk = self.max_io(fid) as usize;
        let mut written = 0;
        loop {
            let end = data.len().min(written + chunk);
            let part = &data[written..end];
            let mut req = Encoder::new();
            req.u32(fid.id)
                .u64(fid.offset)
                .u32(part.len() as u32)
                .raw(part);
            let reply = self.rpc(TWRITE, req)?;
            let n = Decoder::new(&reply).u32()? as usize;
            if n == 0 && !part.is_empty() {
                return Err(NinepError::Malformed("short write"));
            }
            fid.offset += n as u64;
            written += n;
            if written >= data.len() {
                return Ok(());
            }
        }
    }

    pub fn clunk(&mut self, fid: Fid) -> Result<()> {
        self.clunk_id(fid.id)
    }

    fn clunk_id(&mut self, id: u32) -> Result<()> {
        let mut req = Encoder::new();
        req.u32(id);
        self.rpc(TCLUNK, req)?;
        Ok(())
    }

    /// Largest payload a single Twrite on `fid` can carry.
    pub fn max_write(&self, fid: &Fid) -> usize {
        self.max_io(fid) as usize
    }

    fn max_io(&self, fid: &Fid) -> u32 {
        let limit = self.msize.saturating_sub(IOHDRSZ).max(1);
        if fid.iounit == 0 {
            limit
        } else {
            fid.iounit.min(limit)
        }
    }

    fn rpc(&mut self, kind: u8, body: Encoder) -> Result<Vec<u8>> {
        self.rpc_tagged(kind, TAG, body)
    }

    fn rpc_tagged(&mut self, kind: u8, tag: u16, body: Encoder) -> Result<Vec<u8>> {
        let frame = body.finish(kind, tag);
        trace!(target: "afz::9p", "-> type {kind} ({} bytes)", frame.len());
        self.conn.write_all(&frame)?;
        self.conn.flush()?;

        let mut size = [0u8; 4];
        self.conn.read_exact(&mut size)?;
        let size = u32::from_le_bytes(size);
        if size < 7 {
            return Err(NinepError::Malformed("frame shorter than header"));
        }
        if size > self.msize.max(MSIZE) {
            return Err(NinepError::TooLarge {
                size,
                msize: self.msize,
            });
        }
        let mut rest = vec![0u8; size as usize - 4];
        self.conn.read_exact(&mut rest)?;

        let mut reply = Decoder::new(&rest);
        let actual = reply.u8()?;
        let got = reply.u16()?;
        trace!(target: "afz::9p", "<- type {actual} ({size} bytes)");
        if got != tag {
            return Err(NinepError::TagMismatch { sent: tag, got });
        }
        if actual == RERROR {
            return Err(NinepError::Server(reply.str()?));
        }
        if actual != kind + 1 {
            return Err(NinepError::UnexpectedReply {
                expected: kind + 1,
                actual,
            });
        }
        Ok(rest[3..].to_vec())
    }
}

/// Wraps a client and one open fid as a byte stream.
pub struct FidStream<T> {
    client: Client<T>,
    fid: Fid,
}

impl<T: Read + Write> FidStream<T> {
    pub fn new(client: Client<T>, fid: Fid) -> Self {
        Self { client, fid }
    }

    pub fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.client.write(&mut self.fid, data)
    }
}

impl<T: Read + Write> Read for FidStream<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let data = self
            .client
            .read(&mut self.fid, buf.len())
            .map_err(|err| match err {
                NinepError::Io(err) => err,
                other => io::Error::other(other),
            })?;
        if data.len() > buf.len() {
            return Err(io::Error::other(NinepError::Malformed("read reply too long")));
        }
        buf[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }
}

struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    fn new() -> Self {
        // size[4] type[1] tag[2], filled in by finish
        Self { buf: vec![0; 7] }
    }

    fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    fn u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    fn u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    fn str(&mut self, s: &str) -> &mut Self {
        self.u16(s.len() as u16);
        self.buf.extend_from_slice(s.as_bytes());
        self
    }

    fn raw(&mut self, data: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(data);
        self
    }

    fn finish(mut self, kind: u8, tag: u16) -> Vec<u8> {
        let size = self.buf.len() as u32;
        self.buf[0..4].copy_from_slice(&size.to_le_bytes());
        self.buf[4] = kind;
        self.buf[5..7].copy_from_slice(&tag.to_le_bytes());
        self.buf
    }
}

struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or(NinepError::Malformed("truncated field"))?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    fn str(&mut self) -> Result<String> {
        let len = self.u16()? as usize;
        let raw = self.take(len)?;
        Ok(String::from_utf8_lossy(raw).into_owned())
    }

    fn bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.u32()? as usize;
        self.take(len)
    }
}
