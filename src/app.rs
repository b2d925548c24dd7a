use std::sync::mpsc::Receiver;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::acme::WindowSurface;
use crate::config::WindowConfig;
use crate::matcher::{MatchEngine, MatchMode};
use crate::model::{Command, Session};
use crate::plumb::Plumber;
use crate::runner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The user executed `Del`.
    Deleted,
    /// The event thread hung up.
    EventsClosed,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoopStats {
    pub resets: usize,
    pub searches: usize,
    pub fuzzies: usize,
    pub plumbs: usize,
    pub plumb_failures: usize,
}

/// The single consumer of classified commands. Owns the session, the
/// window and the plumber; nothing else touches them.
pub struct App<W, P> {
    session: Session,
    window: W,
    plumber: P,
    engine: MatchEngine,
    stats: LoopStats,
}

impl<W: WindowSurface, P: Plumber> App<W, P> {
    pub fn new(session: Session, window: W, plumber: P, engine: MatchEngine) -> Self {
        Self {
            session,
            window,
            plumber,
            engine,
            stats: LoopStats::default(),
        }
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    /// Names and tags the window, then shows the first run's output.
    pub fn open(&mut self, config: &WindowConfig) -> Result<()> {
        let title = self.session.title(&config.name_suffix);
        self.window
            .set_name(&title)
            .context("failed to name window")?;
        self.window
            .set_tag(&config.tag)
            .context("failed to write window tag")?;
        self.refresh()
    }

    /// Handles commands in arrival order until the queue closes or a `Delete`
    /// arrives. Any error is fatal to the session.
    pub fn run(&mut self, commands: Receiver<Command>) -> Result<LoopExit> {
        let mut exit = LoopExit::EventsClosed;
        for command in commands.iter() {
            if let Some(done) = self.dispatch(command)? {
                exit = done;
                break;
            }
        }
        info!(
            target: "afz::loop",
            "loop finished ({exit:?}): {} resets, {} searches, {} fuzzy, {} plumbed ({} failed)",
            self.stats.resets,
            self.stats.searches,
            self.stats.fuzzies,
            self.stats.plumbs,
            self.stats.plumb_failures
        );
        Ok(exit)
    }

    pub fn dispatch(&mut self, command: Command) -> Result<Option<LoopExit>> {
        debug!(target: "afz::loop", "handling {}", command.kind());
        match command {
            Command::Reset => {
                self.window.clear().context("failed to clear window")?;
                self.refresh()?;
                self.stats.resets += 1;
            }
            Command::Search(query) => {
                self.show_matches(&query, MatchMode::Substring)?;
                self.stats.searches += 1;
            }
            Command::Fuzzy(query) => {
                self.show_matches(&query, MatchMode::Fuzzy)?;
                self.stats.fuzzies += 1;
            }
            Command::PlumbWord(word) => {
                self.stats.plumbs += 1;
                if let Err(err) = self.plumber.plumb(&word, self.session.root()) {
                    self.stats.plumb_failures += 1;
                    warn!(target: "afz::plumb", "failed to plumb {word:?}: {err:#}");
                }
            }
            Command::Delete => {
                self.window.delete().context("failed to delete window")?;
                self.window.close()?;
                return Ok(Some(LoopExit::Deleted));
            }
        }
        Ok(None)
    }

    fn refresh(&mut self) -> Result<()> {
        let raw = runner::run(self.session.command())?;
        self.window
            .append_body(&raw)
            .context("failed to write window body")?;
        self.session.replace_output(raw);
        info!(
            target: "afz::loop",
            "showing {} lines ({} bytes)",
            self.session.searchable_lines().len(),
            self.session.output().len()
        );
        self.window.mark_clean().context("failed to mark window clean")
    }

    fn show_matches(&mut self, query: &str, mode: MatchMode) -> Result<()> {
        self.window.clear().context("failed to clear window")?;
        let lines = self
            .engine
            .filter(self.session.searchable_lines(), query, mode);
        debug!(
            target: "afz::loop",
            "{mode:?} {query:?}: {} of {} lines",
            lines.len(),
            self.session.searchable_lines().len()
        );
        for line in &lines {
            self.window
                .append_body(format!("{line}\n").as_bytes())
                .context("failed to write window body")?;
        }
        self.window.mark_clean().context("failed to mark window clean")
    }
}
