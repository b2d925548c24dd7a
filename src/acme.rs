//! acme windows and their event files, reached over 9P.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::io::{self, BufRead, BufReader};
use std::os::unix::net::UnixStream;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::debug;

use crate::ninep::{self, Client, Fid, FidStream, ORDWR, OWRITE};

/// Set when acme sends a second message carrying the expansion of a null
/// selection.
const FLAG_EXPANDED: u32 = 2;
/// Set when the event carries a chorded argument (two more messages).
const FLAG_CHORDED: u32 = 8;

/// The writes and control messages the interaction loop issues against its
/// window. Every call may fail once the window is gone.
pub trait WindowSurface {
    fn set_name(&mut self, name: &str) -> Result<()>;
    fn set_tag(&mut self, text: &str) -> Result<()>;
    /// Selects the whole buffer and replaces it with nothing.
    fn clear(&mut self) -> Result<()>;
    fn append_body(&mut self, text: &[u8]) -> Result<()>;
    fn mark_clean(&mut self) -> Result<()>;
    fn delete(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

/// A stream of raw window events.
pub trait EventSource {
    /// `Ok(None)` once the stream has ended.
    fn next_event(&mut self) -> Result<Option<Event>>;
    /// Hands an event back to acme for its built-in handling.
    fn write_back(&mut self, event: &Event) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Execute,
    Look,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub c1: char,
    pub c2: char,
    pub q0: usize,
    pub q1: usize,
    pub orig_q0: usize,
    pub orig_q1: usize,
    pub flag: u32,
    pub text: String,
    /// Chorded argument, empty when there is none.
    pub arg: String,
    pub loc: String,
}

impl Event {
    #[cfg(test)]
    pub fn new(c1: char, c2: char, text: &str) -> Self {
        let len = text.chars().count();
        Self {
            c1,
            c2,
            q0: 0,
            q1: len,
            orig_q0: 0,
            orig_q1: len,
            flag: 0,
            text: text.to_string(),
            arg: String::new(),
            loc: String::new(),
        }
    }

    pub fn origin(&self) -> Origin {
        match self.c2 {
            'x' | 'X' => Origin::Execute,
            'l' | 'L' => Origin::Look,
            _ => Origin::Other,
        }
    }

    /// The message that returns this event to acme, addressed by the
    /// original range.
    pub fn write_back(&self) -> String {
        format!("{}{}{} {}\n", self.c1, self.c2, self.orig_q0, self.orig_q1)
    }
}

/// Reads one logical event, folding in expansion and chord messages.
pub fn read_event<R: BufRead>(reader: &mut R) -> io::Result<Option<Event>> {
    let Some(mut event) = read_message(reader)? else {
        return Ok(None);
    };
    if event.flag & FLAG_EXPANDED != 0 {
        let expansion = read_message(reader)?.ok_or_else(truncated)?;
        if event.q0 == event.q1 {
            event.q0 = expansion.q0;
            event.q1 = expansion.q1;
            event.text = expansion.text;
        }
    }
    if event.flag & FLAG_CHORDED != 0 {
        let arg = read_message(reader)?.ok_or_else(truncated)?;
        let loc = read_message(reader)?.ok_or_else(truncated)?;
        event.arg = arg.text;
        event.loc = loc.text;
    }
    Ok(Some(event))
}

// c1 c2 q0 ' ' q1 ' ' flag ' ' nr ' ' text '\n'
fn read_message<R: BufRead>(reader: &mut R) -> io::Result<Option<Event>> {
    let Some(c1) = read_byte(reader)? else {
        return Ok(None);
    };
    let c2 = read_byte(reader)?.ok_or_else(truncated)?;
    let q0 = read_number(reader)?;
    let q1 = read_number(reader)?;
    let flag = read_number(reader)? as u32;
    let nr = read_number(reader)?;
    let mut text = String::new();
    for _ in 0..nr {
        text.push(read_char(reader)?);
    }
    if read_byte(reader)? != Some(b'\n') {
        return Err(malformed("event not terminated by newline"));
    }
    Ok(Some(Event {
        c1: c1 as char,
        c2: c2 as char,
        q0,
        q1,
        orig_q0: q0,
        orig_q1: q1,
        flag,
        text,
        arg: String::new(),
        loc: String::new(),
    }))
}

fn read_byte<R: BufRead>(reader: &mut R) -> io::Result<Option<u8>> {
    let byte = reader.fill_buf()?.first().copied();
    if byte.is_some() {
        reader.consume(1);
    }
    Ok(byte)
}

fn read_number<R: BufRead>(reader: &mut R) -> io::Result<usize> {
    let mut value: usize = 0;
    let mut digits = 0;
    loop {
        match read_byte(reader)?.ok_or_else(truncated)? {
            b @ b'0'..=b'9' => {
                value = value
                    .checked_mul(10)
                    .and_then(|v| v.checked_add(usize::from(b - b'0')))
                    .ok_or_else(|| malformed("event number overflows"))?;
                digits += 1;
            }
            b' ' if digits > 0 => return Ok(value),
            _ => return Err(malformed("bad number in event")),
        }
    }
}

fn read_char<R: BufRead>(reader: &mut R) -> io::Result<char> {
    let first = read_byte(reader)?.ok_or_else(truncated)?;
    let width = match first {
        0x00..=0x7f => return Ok(first as char),
        0xc0..=0xdf => 2,
        0xe0..=0xef => 3,
        0xf0..=0xf7 => 4,
        _ => return Ok(char::REPLACEMENT_CHARACTER),
    };
    let mut buf = [first, 0, 0, 0];
    for slot in buf.iter_mut().take(width).skip(1) {
        *slot = read_byte(reader)?.ok_or_else(truncated)?;
    }
    Ok(std::str::from_utf8(&buf[..width])
        .ok()
        .and_then(|s| s.chars().next())
        .unwrap_or(char::REPLACEMENT_CHARACTER))
}

fn truncated() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "truncated acme event")
}

fn malformed(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// One acme window. Per-window files are opened on first use and stay open
/// until `close`.
pub struct AcmeWindow {
    id: u32,
    client: Client<UnixStream>,
    files: HashMap<&'static str, Fid>,
}

impl AcmeWindow {
    pub fn create(ns: &Path) -> Result<Self> {
        let client = ninep::dial(ns, "acme").context("failed to connect to acme")?;
        Self::create_in(client)
    }

    pub fn create_in(mut client: Client<UnixStream>) -> Result<Self> {
        let mut ctl = client
            .open("new/ctl", ORDWR)
            .context("acme: open new/ctl")?;
        let info = client.read(&mut ctl, 256).context("acme: read new/ctl")?;
        let id = parse_window_id(&info)?;
        debug!(target: "afz::acme", "created window {id}");

        let mut files = HashMap::new();
        files.insert("ctl", ctl);
        Ok(Self { id, client, files })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    fn write_file(&mut self, name: &'static str, data: &[u8]) -> Result<()> {
        let id = self.id;
        let fid = match self.files.entry(name) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let path = format!("{id}/{name}");
                let fid = self
                    .client
                    .open(&path, OWRITE)
                    .with_context(|| format!("acme: open {path}"))?;
                entry.insert(fid)
            }
        };
        self.client
            .write(fid, data)
            .with_context(|| format!("acme: write {id}/{name}"))
    }

    fn ctl(&mut self, message: &str) -> Result<()> {
        self.write_file("ctl", format!("{message}\n").as_bytes())
    }
}

fn parse_window_id(info: &[u8]) -> Result<u32> {
    let info = String::from_utf8_lossy(info);
    let field = info
        .split_whitespace()
        .next()
        .ok_or_else(|| anyhow!("acme: empty reply from new/ctl"))?;
    field
        .parse()
        .with_context(|| format!("acme: bad window id {field:?}"))
}

impl WindowSurface for AcmeWindow {
    fn set_name(&mut self, name: &str) -> Result<()> {
        self.ctl(&format!("name {name}"))
    }

    fn set_tag(&mut self, text: &str) -> Result<()> {
        self.write_file("tag", text.as_bytes())
    }

    fn clear(&mut self) -> Result<()> {
        self.write_file("addr", b"0,$")?;
        self.write_file("data", b"")
    }

    fn append_body(&mut self, text: &[u8]) -> Result<()> {
        self.write_file("body", text)
    }

    fn mark_clean(&mut self) -> Result<()> {
        self.ctl("clean")
    }

    fn delete(&mut self) -> Result<()> {
        self.ctl("delete")
    }

    fn close(&mut self) -> Result<()> {
        let mut first_err = None;
        for (name, fid) in self.files.drain() {
            if let Err(err) = self.client.clunk(fid) {
                debug!(target: "afz::acme", "clunk {name}: {err}");
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err).context("acme: close window"),
            None => Ok(()),
        }
    }
}

/// The event file of one window, on its own connection.
pub struct AcmeEvents {
    reader: BufReader<FidStream<UnixStream>>,
}

impl AcmeEvents {
    pub fn open(ns: &Path, id: u32) -> Result<Self> {
        let client = ninep::dial(ns, "acme").context("failed to connect to acme")?;
        Self::open_in(client, id)
    }

    pub fn open_in(mut client: Client<UnixStream>, id: u32) -> Result<Self> {
        let path = format!("{id}/event");
        let fid = client
            .open(&path, ORDWR)
            .with_context(|| format!("acme: open {path}"))?;
        Ok(Self {
            reader: BufReader::new(FidStream::new(client, fid)),
        })
    }
}

impl EventSource for AcmeEvents {
    fn next_event(&mut self) -> Result<Option<Event>> {
        read_event(&mut self.reader).context("acme: read event")
    }

    fn write_back(&mut self, event: &Event) -> Result<()> {
        self.reader
            .get_mut()
            .write_all(event.write_back().as_bytes())
            .context("acme: write event")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ninep::testing::{files, serve};

    fn parse(raw: &str) -> Vec<Event> {
        let mut reader = raw.as_bytes();
        let mut events = Vec::new();
        while let Some(event) = read_event(&mut reader).unwrap() {
            events.push(event);
        }
        events
    }

    #[test]
    fn parses_plain_execute() {
        let events = parse("Mx12 17 0 5 Reset\n");
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!((event.c1, event.c2), ('M', 'x'));
        assert_eq!((event.q0, event.q1), (12, 17));
        assert_eq!(event.text, "Reset");
        assert_eq!(event.origin(), Origin::Execute);
    }

    #[test]
    fn parses_multibyte_text_by_rune_count() {
        let events = parse("Ml0 4 0 4 café\nKx0 0 0 0 \n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].text, "café");
        assert_eq!(events[0].origin(), Origin::Look);
        assert_eq!(events[1].text, "");
    }

    #[test]
    fn expansion_replaces_null_selection() {
        let events = parse("Ml7 7 2 0 \nMl5 10 0 5 apple\n");
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.text, "apple");
        assert_eq!((event.q0, event.q1), (5, 10));
        assert_eq!((event.orig_q0, event.orig_q1), (7, 7));
        assert_eq!(event.write_back(), "Ml7 7\n");
    }

    #[test]
    fn chorded_argument_is_collected() {
        let raw = "Mx0 6 8 6 Search\nMx0 0 0 3 ban\nMx0 0 0 10 /tmp:#3,#6\n";
        let events = parse(raw);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].text, "Search");
        assert_eq!(events[0].arg, "ban");
        assert_eq!(events[0].loc, "/tmp:#3,#6");
    }

    #[test]
    fn truncated_event_is_an_error() {
        let mut reader = "Mx1 2 0 5 Res".as_bytes();
        assert!(read_event(&mut reader).is_err());
        let mut reader = "Mx1 x 0 0 \n".as_bytes();
        assert!(read_event(&mut reader).is_err());
    }

    #[test]
    fn window_id_is_first_field() {
        assert_eq!(parse_window_id(b"         12          0 0 0 0 ").unwrap(), 12);
        assert!(parse_window_id(b"").is_err());
        assert!(parse_window_id(b"abc").is_err());
    }

    #[test]
    fn window_writes_reach_acme_files() {
        let files = files(&[
            ("new/ctl", "          7          0          0"),
            ("7/tag", ""),
            ("7/addr", ""),
            ("7/data", ""),
            ("7/body", ""),
        ]);
        let client = Client::connect(serve(files.clone()), "me").unwrap();
        let mut window = AcmeWindow::create_in(client).unwrap();
        assert_eq!(window.id(), 7);

        window.set_name("/src/-afz").unwrap();
        window.set_tag("Reset Search Fuzzy").unwrap();
        window.clear().unwrap();
        window.append_body(b"apple\n").unwrap();
        window.mark_clean().unwrap();
        window.delete().unwrap();
        window.close().unwrap();

        let files = files.lock().unwrap();
        assert_eq!(
            files.writes["new/ctl"],
            vec![
                b"name /src/-afz\n".to_vec(),
                b"clean\n".to_vec(),
                b"delete\n".to_vec()
            ]
        );
        assert_eq!(files.writes["7/tag"], vec![b"Reset Search Fuzzy".to_vec()]);
        assert_eq!(files.writes["7/addr"], vec![b"0,$".to_vec()]);
        assert_eq!(files.writes["7/data"], vec![Vec::<u8>::new()]);
        assert_eq!(files.writes["7/body"], vec![b"apple\n".to_vec()]);
    }

    #[test]
    fn event_file_streams_and_accepts_write_back() {
        let files = files(&[("3/event", "Mx0 3 0 3 Del\nML4 9 0 5 grape\n")]);
        let client = Client::connect(serve(files.clone()), "me").unwrap();
        let mut events = AcmeEvents::open_in(client, 3).unwrap();

        let first = events.next_event().unwrap().unwrap();
        assert_eq!(first.text, "Del");
        let second = events.next_event().unwrap().unwrap();
        assert_eq!(second.text, "grape");
        events.write_back(&second).unwrap();
        assert!(events.next_event().unwrap().is_none());

        let files = files.lock().unwrap();
        assert_eq!(files.writes["3/event"], vec![b"ML4 9\n".to_vec()]);
    }
}
