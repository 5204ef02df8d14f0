//! Subscriber setup: console output plus optional JSON log files routed per
//! subsystem.
//!
//! Each [`Section`] key names a target prefix (`mountkit`, `api_ingress`,
//! ...); `default` covers everything else. `RUST_LOG`, when set, caps both
//! sinks.

use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use file_rotate::compression::Compression;
use file_rotate::suffix::{AppendTimestamp, FileLimit};
use file_rotate::{ContentLimit, FileRotate};
use parking_lot::Mutex;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::{LoggingConfig, Section};

const DEFAULT_SECTION: &str = "default";
const DEFAULT_MAX_SIZE_MB: u64 = 100;

// Keeps the non-blocking console worker alive for the whole process.
static CONSOLE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// `None` means the sink is off; unknown names fall back to `info`.
fn parse_level(s: &str) -> Option<LevelFilter> {
    match s.trim().to_ascii_lowercase().as_str() {
        "trace" => Some(LevelFilter::TRACE),
        "debug" => Some(LevelFilter::DEBUG),
        "info" | "" => Some(LevelFilter::INFO),
        "warn" => Some(LevelFilter::WARN),
        "error" => Some(LevelFilter::ERROR),
        "off" | "none" => None,
        _ => Some(LevelFilter::INFO),
    }
}

/// `target` belongs to subsystem `prefix` (`mountkit` matches `mountkit::routes`).
fn matches_prefix(target: &str, prefix: &str) -> bool {
    target
        .strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
}

type Rotating = Arc<Mutex<FileRotate<AppendTimestamp>>>;

#[derive(Clone)]
struct FileSink(Option<Rotating>);

impl Write for FileSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &self.0 {
            Some(file) => file.lock().write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &self.0 {
            Some(file) => file.lock().flush(),
            None => Ok(()),
        }
    }
}

/// Picks the log file for an event by target prefix, longest prefix first.
#[derive(Clone, Default)]
struct FileRouter {
    default: Option<Rotating>,
    by_prefix: Vec<(String, Rotating)>,
}

impl FileRouter {
    fn build(cfg: &LoggingConfig, base_dir: &Path) -> Self {
        let mut router = Self::default();
        for (name, section) in cfg {
            let Some(file) = open_rotating(name, section, base_dir) else {
                continue;
            };
            if name == DEFAULT_SECTION {
                router.default = Some(file);
            } else {
                router.by_prefix.push((name.clone(), file));
            }
        }
        router.by_prefix.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(a.0.cmp(&b.0)));
        router
    }

    fn resolve(&self, target: &str) -> Option<Rotating> {
        self.by_prefix
            .iter()
            .find(|(prefix, _)| matches_prefix(target, prefix))
            .map(|(_, file)| file.clone())
            .or_else(|| self.default.clone())
    }

    fn is_empty(&self) -> bool {
        self.default.is_none() && self.by_prefix.is_empty()
    }
}

impl<'a> MakeWriter<'a> for FileRouter {
    type Writer = FileSink;

    fn make_writer(&'a self) -> Self::Writer {
        FileSink(self.default.clone())
    }

    fn make_writer_for(&'a self, meta: &tracing::Metadata<'_>) -> Self::Writer {
        FileSink(self.resolve(meta.target()))
    }
}

fn log_path(file: &str, base_dir: &Path) -> PathBuf {
    let p = Path::new(file);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}

/// Open the rotating file of `section`; `None` when it has no file or the
/// file cannot be created (reported on stderr, logging is not up yet).
fn open_rotating(name: &str, section: &Section, base_dir: &Path) -> Option<Rotating> {
    if section.file.trim().is_empty() {
        return None;
    }
    let path = log_path(&section.file, base_dir);
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            eprintln!("Failed to create log directory for '{name}': {} ({e})", parent.display());
            return None;
        }
    }

    // max_backups wins over max_age_days
    let limit = match section.max_backups {
        Some(n) => FileLimit::MaxFiles(n),
        None => FileLimit::Age(chrono::Duration::days(
            i64::from(section.max_age_days.unwrap_or(1)),
        )),
    };
    let max_bytes = section.max_size_mb.unwrap_or(DEFAULT_MAX_SIZE_MB) as usize * 1024 * 1024;

    let rotate = FileRotate::new(
        &path,
        AppendTimestamp::default(limit),
        ContentLimit::BytesSurpassed(max_bytes),
        Compression::None,
        None,
    );
    Some(Arc::new(Mutex::new(rotate)))
}

#[derive(Clone, Copy)]
enum Sink {
    Console,
    File,
}

/// Per-target level filter for one sink.
fn sink_targets(cfg: &LoggingConfig, sink: Sink, has_default_file: bool) -> Targets {
    let level_of = |section: &Section| match sink {
        Sink::Console => parse_level(&section.console_level),
        Sink::File => parse_level(&section.file_level),
    };

    let default_level = match (sink, cfg.get(DEFAULT_SECTION)) {
        (Sink::File, _) if !has_default_file => LevelFilter::OFF,
        (_, Some(section)) => level_of(section).unwrap_or(LevelFilter::OFF),
        (_, None) => LevelFilter::INFO,
    };

    let mut targets = Targets::new().with_default(default_level);
    for (name, section) in cfg.iter().filter(|(k, _)| k.as_str() != DEFAULT_SECTION) {
        if matches!(sink, Sink::File) && section.file.trim().is_empty() {
            continue;
        }
        targets = targets.with_target(name.clone(), level_of(section).unwrap_or(LevelFilter::OFF));
    }
    targets
}

/// Install the global subscriber. Relative log files resolve against `base_dir`.
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init_logging(cfg: &LoggingConfig, base_dir: &Path) {
    // Bridge `log` records before the subscriber goes in.
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("LogTracer init skipped: {e}");
    }

    let env = EnvFilter::try_from_default_env().ok();

    if cfg.is_empty() {
        let console = fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339());
        let _ = Registry::default().with(env).with(console).try_init();
        return;
    }

    let files = FileRouter::build(cfg, base_dir);
    let console_targets = sink_targets(cfg, Sink::Console, files.default.is_some());
    let file_targets = sink_targets(cfg, Sink::File, files.default.is_some());

    let (stderr, guard) = tracing_appender::non_blocking(std::io::stderr());
    let _ = CONSOLE_GUARD.set(guard);

    let console = fmt::layer()
        .with_writer(stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(true)
        .with_level(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_filter(console_targets);

    let file = (!files.is_empty()).then(|| {
        fmt::layer()
            .json()
            .with_ansi(false)
            .with_target(true)
            .with_level(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(files)
            .with_filter(file_targets)
    });

    let _ = Registry::default().with(env).with(console).with(file).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tracing::Level;

    fn section(console: &str, file: &str, file_level: &str) -> Section {
        Section {
            console_level: console.into(),
            file: file.into(),
            file_level: file_level.into(),
            max_age_days: None,
            max_backups: Some(2),
            max_size_mb: Some(1),
        }
    }

    #[test]
    fn levels() {
        assert_eq!(parse_level("DEBUG"), Some(LevelFilter::DEBUG));
        assert_eq!(parse_level("off"), None);
        assert_eq!(parse_level("loud"), Some(LevelFilter::INFO));
        assert_eq!(parse_level(""), Some(LevelFilter::INFO));
    }

    #[test]
    fn prefix_matching_respects_module_boundaries() {
        assert!(matches_prefix("mountkit", "mountkit"));
        assert!(matches_prefix("mountkit::routes::mount", "mountkit"));
        assert!(!matches_prefix("mountkit_bootstrap", "mountkit"));
        assert!(!matches_prefix("api", "api_ingress"));
    }

    #[test]
    fn console_targets_follow_sections() {
        let mut cfg = LoggingConfig::new();
        cfg.insert(DEFAULT_SECTION.into(), section("warn", "", ""));
        cfg.insert("mountkit".into(), section("trace", "", ""));
        cfg.insert("noisy".into(), section("off", "", ""));

        let targets = sink_targets(&cfg, Sink::Console, false);
        assert!(targets.would_enable("mountkit::routes", &Level::TRACE));
        assert!(!targets.would_enable("other", &Level::INFO));
        assert!(targets.would_enable("other", &Level::WARN));
        assert!(!targets.would_enable("noisy", &Level::ERROR));
    }

    #[test]
    fn file_targets_need_a_file() {
        let mut cfg = LoggingConfig::new();
        cfg.insert(DEFAULT_SECTION.into(), section("info", "", "debug"));
        cfg.insert("mountkit".into(), section("info", "logs/mk.log", "debug"));
        cfg.insert("api_ingress".into(), section("info", "", "trace"));

        let targets = sink_targets(&cfg, Sink::File, false);
        assert!(targets.would_enable("mountkit", &Level::DEBUG));
        assert!(!targets.would_enable("api_ingress", &Level::ERROR));
        assert!(!targets.would_enable("other", &Level::ERROR));
    }

    #[test]
    fn file_router_prefers_longest_prefix() {
        let tmp = tempdir().unwrap();
        let mut cfg = LoggingConfig::new();
        cfg.insert(DEFAULT_SECTION.into(), section("info", "logs/all.log", "info"));
        cfg.insert("mountkit".into(), section("info", "logs/mk.log", "info"));
        cfg.insert("mountkit::routes".into(), section("info", "logs/routes.log", "info"));
        cfg.insert("quiet".into(), section("info", "", "info"));

        let router = FileRouter::build(&cfg, tmp.path());
        assert_eq!(router.by_prefix.len(), 2);
        assert_eq!(router.by_prefix[0].0, "mountkit::routes");

        let routes = router.resolve("mountkit::routes::mount").unwrap();
        let mk = router.resolve("mountkit::loader").unwrap();
        let other = router.resolve("quiet").unwrap();
        assert!(Arc::ptr_eq(&routes, &router.by_prefix[0].1));
        assert!(Arc::ptr_eq(&mk, &router.by_prefix[1].1));
        assert!(Arc::ptr_eq(&other, router.default.as_ref().unwrap()));

        FileSink(Some(routes)).write_all(b"line\n").unwrap();
        assert!(tmp.path().join("logs").is_dir());
    }

    #[test]
    fn relative_files_resolve_against_base_dir() {
        let base = Path::new("/var/lib/mountkit");
        assert_eq!(log_path("logs/a.log", base), base.join("logs/a.log"));
        assert_eq!(log_path("/tmp/b.log", base), PathBuf::from("/tmp/b.log"));
    }
}
