use std::io;
use std::sync::mpsc::SyncSender;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, trace, warn};

use crate::acme::{Event, EventSource, Origin};
use crate::model::Command;

/// What to do with one raw event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Emit(Command),
    /// Not ours; acme should run its built-in handling.
    Forward,
    /// Typing and other bookkeeping events acme has already applied.
    Ignore,
}

pub fn classify(event: &Event) -> Action {
    match event.origin() {
        Origin::Execute => classify_execute(event),
        Origin::Look => {
            let word = event.text.trim();
            if word.is_empty() {
                Action::Forward
            } else {
                Action::Emit(Command::PlumbWord(word.to_string()))
            }
        }
        // Typing and deletion: acme applied these before reporting them.
        Origin::Other => Action::Ignore,
    }
}

fn classify_execute(event: &Event) -> Action {
    let text = event.text.trim();
    let (word, rest) = match text.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (text, ""),
    };
    // An explicit query wins over a chorded argument.
    let query = || {
        if rest.is_empty() {
            event.arg.trim().to_string()
        } else {
            rest.to_string()
        }
    };

    match word {
        "Del" if rest.is_empty() => Action::Emit(Command::Delete),
        "Reset" if rest.is_empty() => Action::Emit(Command::Reset),
        "Search" | "S" => Action::Emit(Command::Search(query())),
        "Fuzzy" | "F" => Action::Emit(Command::Fuzzy(query())),
        _ => Action::Forward,
    }
}

/// Starts the event thread. It ends, dropping `tx`, when the event stream
/// ends, after forwarding `Delete`, or once the receiver is gone.
pub fn spawn<E>(source: E, tx: SyncSender<Command>) -> io::Result<JoinHandle<()>>
where
    E: EventSource + Send + 'static,
{
    thread::Builder::new()
        .name("afz-events".to_string())
        .spawn(move || {
            let mut source = source;
            pump(&mut source, &tx);
        })
}

/// Classifies events in arrival order until the stream or the queue closes.
/// Blocks while the queue is full.
pub fn pump<E: EventSource>(source: &mut E, tx: &SyncSender<Command>) {
    loop {
        let event = match source.next_event() {
            Ok(Some(event)) => event,
            Ok(None) => {
                info!(target: "afz::classify", "event stream ended");
                return;
            }
            Err(err) => {
                info!(target: "afz::classify", "event stream failed: {err:#}");
                return;
            }
        };

        match classify(&event) {
            Action::Emit(command) => {
                let last = command == Command::Delete;
                if !event.arg.is_empty() {
                    debug!(target: "afz::classify", "chorded argument from {}", event.loc);
                }
                debug!(target: "afz::classify", "queueing {command:?}");
                if tx.send(command).is_err() {
                    debug!(target: "afz::classify", "command queue closed");
                    return;
                }
                if last {
                    return;
                }
            }
            Action::Forward => {
                trace!(
                    target: "afz::classify",
                    "forwarding {:?} at #{},#{}",
                    event.text,
                    event.q0,
                    event.q1
                );
                if let Err(err) = source.write_back(&event) {
                    warn!(target: "afz::classify", "failed to return event to acme: {err:#}");
                    return;
                }
            }
            Action::Ignore => {}
        }
    }
}
