use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

/// Smallest event queue we accept.
pub const MIN_QUEUE_CAPACITY: usize = 10;

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub matcher: MatcherConfig,
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub plumb: PlumbConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub acme: AcmeConfig,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    #[default]
    Skim,
    Clangd,
    Subsequence,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CaseMode {
    /// Case-insensitive unless the query has an uppercase letter.
    #[default]
    Smart,
    Ignore,
    Respect,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MatcherConfig {
    #[serde(default)]
    pub algorithm: Algorithm,
    #[serde(default)]
    pub case: CaseMode,
}

fn default_tag() -> String {
    "Reset Search Fuzzy".to_string()
}

fn default_name_suffix() -> String {
    "-afz".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_tag")]
    pub tag: String,
    #[serde(default = "default_name_suffix")]
    pub name_suffix: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            tag: default_tag(),
            name_suffix: default_name_suffix(),
        }
    }
}

fn default_src() -> String {
    "afz".to_string()
}

fn default_port() -> String {
    "send".to_string()
}

fn default_content_type() -> String {
    "text".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlumbConfig {
    #[serde(default = "default_src")]
    pub src: String,
    #[serde(default = "default_port")]
    pub port: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
}

impl Default for PlumbConfig {
    fn default() -> Self {
        Self {
            src: default_src(),
            port: default_port(),
            content_type: default_content_type(),
        }
    }
}

fn default_queue_capacity() -> usize {
    64
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AcmeConfig {
    /// Directory holding the `acme` and `plumb` sockets. Defaults to the
    /// plan9port namespace.
    #[serde(default)]
    pub namespace: Option<PathBuf>,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.events.queue_capacity < MIN_QUEUE_CAPACITY {
            bail!(
                "events.queue_capacity must be at least {MIN_QUEUE_CAPACITY}, got {}",
                self.events.queue_capacity
            );
        }
        if self.window.tag.trim().is_empty() {
            bail!("window.tag cannot be empty");
        }
        if self.plumb.port.trim().is_empty() {
            bail!("plumb.port cannot be empty");
        }
        Ok(())
    }
}

/// Finds, parses and validates the config. With no file anywhere the
/// defaults are used.
pub fn load(cwd: &Path, explicit_path: Option<&Path>) -> Result<LoadedConfig> {
    let path = match explicit_path {
        Some(path) => Some(path.to_path_buf()),
        None => discover(cwd)?,
    };
    let Some(path) = path else {
        return Ok(LoadedConfig {
            config: Config::default(),
            path: None,
        });
    };

    let config = load_from_path(&path)?;
    config
        .validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(LoadedConfig {
        config,
        path: Some(path),
    })
}

/// `./afz.toml`, then `./.afz.toml`, then the global config.
fn discover(cwd: &Path) -> Result<Option<PathBuf>> {
    let local = [cwd.join("afz.toml"), cwd.join(".afz.toml")];
    if let Some(path) = local.into_iter().find(|path| path.is_file()) {
        return Ok(Some(path));
    }
    let global = global_config_path()?;
    Ok(global.is_file().then_some(global))
}

pub fn global_config_path() -> Result<PathBuf> {
    let config_root = dirs::config_dir().context("unable to resolve OS config directory")?;
    Ok(config_root.join("afz").join("config.toml"))
}

pub fn write_example_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("refusing to overwrite {} without --force", path.display());
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    fs::write(path, EXAMPLE_CONFIG)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn load_from_path(path: &Path) -> Result<Config> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("invalid TOML in {}", path.display()))
}

const EXAMPLE_CONFIG: &str = r#"# afz config
#
# Every key is optional; the values below are the defaults.

[matcher]
# skim | clangd | subsequence
algorithm = "skim"
# smart | ignore | respect
case = "smart"

[window]
# Command words shown in the window tag.
tag = "Reset Search Fuzzy"
# The window is named <startup dir>/<name_suffix>.
name_suffix = "-afz"

[plumb]
src = "afz"
port = "send"
content_type = "text"

[events]
# Pending editor commands. The event reader waits when the queue is full.
queue_capacity = 64

[acme]
# Directory with the acme and plumb sockets. Defaults to $NAMESPACE or
# /tmp/ns.$USER.$DISPLAY.
# namespace = "/tmp/ns.me.:0"
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    static NEXT_DIR: AtomicUsize = AtomicUsize::new(0);

    #[test]
    fn empty_config_uses_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.matcher.algorithm, Algorithm::Skim);
        assert_eq!(cfg.matcher.case, CaseMode::Smart);
        assert_eq!(cfg.window.tag, "Reset Search Fuzzy");
        assert_eq!(cfg.window.name_suffix, "-afz");
        assert_eq!(cfg.plumb.src, "afz");
        assert_eq!(cfg.plumb.port, "send");
        assert_eq!(cfg.events.queue_capacity, 64);
        assert!(cfg.acme.namespace.is_none());
        cfg.validate().unwrap();
    }

    #[test]
    fn sections_override_defaults() {
        let raw = r#"
[matcher]
algorithm = "subsequence"
case = "respect"

[window]
tag = "Reset Fuzzy"

[events]
queue_capacity = 16

[acme]
namespace = "/tmp/ns.test.:1"
"#;
        let cfg: Config = toml::from_str(raw).unwrap();
        assert_eq!(cfg.matcher.algorithm, Algorithm::Subsequence);
        assert_eq!(cfg.matcher.case, CaseMode::Respect);
        assert_eq!(cfg.window.tag, "Reset Fuzzy");
        assert_eq!(cfg.window.name_suffix, "-afz");
        assert_eq!(cfg.events.queue_capacity, 16);
        assert_eq!(
            cfg.acme.namespace.as_deref(),
            Some(Path::new("/tmp/ns.test.:1"))
        );
    }

    #[test]
    fn rejects_unknown_algorithm() {
        let raw = r#"
[matcher]
algorithm = "fzf"
"#;
        assert!(toml::from_str::<Config>(raw).is_err());
    }

    #[test]
    fn rejects_tiny_queue() {
        let raw = r#"
[events]
queue_capacity = 2
"#;
        let cfg: Config = toml::from_str(raw).unwrap();
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("queue_capacity"), "{err}");
    }

    #[test]
    fn rejects_blank_tag() {
        let raw = r#"
[window]
tag = "  "
"#;
        let cfg: Config = toml::from_str(raw).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn example_config_parses_to_defaults() {
        let cfg: Config = toml::from_str(EXAMPLE_CONFIG).unwrap();
        assert_eq!(cfg.matcher.algorithm, Algorithm::Skim);
        assert_eq!(cfg.events.queue_capacity, 64);
        cfg.validate().unwrap();
    }

    #[test]
    fn local_config_is_preferred() {
        let root = make_temp_dir();
        fs::write(root.join(".afz.toml"), "[window]\ntag = \"hidden\"\n").unwrap();
        fs::write(root.join("afz.toml"), "[window]\ntag = \"visible\"\n").unwrap();

        let loaded = load(&root, None).unwrap();
        assert_eq!(loaded.config.window.tag, "visible");
        assert_eq!(loaded.path, Some(root.join("afz.toml")));

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn explicit_config_wins() {
        let root = make_temp_dir();
        fs::write(root.join("afz.toml"), "[window]\ntag = \"local\"\n").unwrap();
        let explicit = root.join("other.toml");
        fs::write(&explicit, "[window]\ntag = \"explicit\"\n").unwrap();

        let loaded = load(&root, Some(&explicit)).unwrap();
        assert_eq!(loaded.config.window.tag, "explicit");

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn loaded_config_is_validated() {
        let root = make_temp_dir();
        fs::write(root.join("afz.toml"), "[events]\nqueue_capacity = 3\n").unwrap();

        let err = format!("{:#}", load(&root, None).unwrap_err());
        assert!(err.contains("afz.toml"), "{err}");
        assert!(err.contains("queue_capacity"), "{err}");

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn example_writer_refuses_to_overwrite() {
        let root = make_temp_dir();
        let path = root.join("nested").join("config.toml");

        write_example_config(&path, false).unwrap();
        assert!(write_example_config(&path, false).is_err());
        write_example_config(&path, true).unwrap();

        let _ = fs::remove_dir_all(root);
    }

    fn make_temp_dir() -> PathBuf {
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path = std::env::temp_dir().join(format!(
            "afz-config-test-{nonce}-{}",
            NEXT_DIR.fetch_add(1, Ordering::Relaxed)
        ));
        fs::create_dir_all(&path).unwrap();
        path
    }
}
