//! Tracing subscriber setup: console formatter, file layer, and initialisation.
use std::fmt::Write as _;
use std::fs;
use std::io::Write as _;
use std::sync::Mutex;

use tracing::Level;
use tracing::field::{Field, Visit};

use super::utils::{header_timestamp, line_timestamp, log_file_path, rotate, strip_ansi};

/// Target of stage headers.
pub(crate) const STAGE_TARGET: &str = "configsync::stage";

/// Environment variable holding an `EnvFilter` directive for the console.
const FILTER_ENV: &str = "CONFIGSYNC_LOG";

/// Collects an event's message and any structured fields as `key=value`.
#[derive(Default)]
struct EventText {
    message: String,
    fields: String,
}

impl EventText {
    fn of(event: &tracing::Event<'_>) -> Self {
        let mut text = Self::default();
        event.record(&mut text);
        text
    }

    fn render(&self) -> String {
        format!("{}{}", self.message, self.fields)
    }
}

impl Visit for EventText {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            write!(self.message, "{value:?}").ok();
        } else {
            write!(self.fields, " {}={value:?}", field.name()).ok();
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            write!(self.fields, " {}={value}", field.name()).ok();
        }
    }
}

/// A [`tracing_subscriber::Layer`] writing every event to the command's log
/// file as plain text.
///
/// The previous run's file is kept as `<command>.log.1`.
#[derive(Debug)]
pub(crate) struct FileLayer {
    file: Mutex<fs::File>,
}

impl FileLayer {
    /// Rotate and open the log file for `command` and write the run header.
    ///
    /// Returns `None` if the log directory or file is unusable; logging then
    /// continues on the console only.
    pub(crate) fn new(command: &str) -> Option<Self> {
        let path = log_file_path(command)?;
        rotate(&path);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .ok()?;
        writeln!(
            file,
            "# configsync {} {command} (pid {}) {}",
            option_env!("CONFIGSYNC_VERSION").unwrap_or(env!("CARGO_PKG_VERSION")),
            std::process::id(),
            header_timestamp(),
        )
        .ok()?;
        Some(Self {
            file: Mutex::new(file),
        })
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for FileLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let metadata = event.metadata();
        let text = strip_ansi(&EventText::of(event).render());
        let tag = match *metadata.level() {
            Level::INFO if metadata.target() == STAGE_TARGET => "==>",
            Level::ERROR => "ERROR",
            Level::WARN => "WARN",
            Level::INFO => "INFO",
            Level::DEBUG => "DEBUG",
            _ => "TRACE",
        };

        if let Ok(mut f) = self.file.lock() {
            writeln!(f, "{} {tag:<5} {text}", line_timestamp()).ok();
        }
    }
}

/// Console output: bold stage arrows, indented messages, coloured levels.
struct ConsoleFormatter;

impl<S, N> tracing_subscriber::fmt::FormatEvent<S, N> for ConsoleFormatter
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: tracing_subscriber::fmt::format::Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();
        let text = EventText::of(event).render();
        let color = writer.has_ansi_escapes();
        let paint = |code: &str, s: &str| {
            if color {
                format!("\x1b[{code}m{s}\x1b[0m")
            } else {
                s.to_string()
            }
        };

        match *metadata.level() {
            Level::ERROR => writeln!(writer, "{} {text}", paint("31", "error:")),
            Level::WARN => writeln!(writer, "{} {text}", paint("33", "warning:")),
            Level::INFO if metadata.target() == STAGE_TARGET => {
                writeln!(writer, "{} {}", paint("1;34", "==>"), paint("1", &text))
            }
            Level::INFO => writeln!(writer, "    {text}"),
            _ => writeln!(writer, "    {}", paint("2", &text)),
        }
    }
}

/// Install the global [`tracing`] subscriber.
///
/// The console shows `info` and above (`debug` with `verbose`, or whatever
/// `$CONFIGSYNC_LOG` selects); warnings and errors go to stderr.  The log
/// file for `command` receives everything at `debug` and above.  Call once,
/// before anything logs.
pub fn init_subscriber(verbose: bool, command: &str) {
    use tracing_subscriber::fmt::writer::MakeWriterExt as _;
    use tracing_subscriber::{
        EnvFilter, Layer as _, filter::LevelFilter, fmt, layer::SubscriberExt as _,
        util::SubscriberInitExt as _,
    };

    let default_level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let console_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .with_env_var(FILTER_ENV)
        .from_env_lossy();

    let make_writer = std::io::stderr
        .with_max_level(Level::WARN)
        .or_else(std::io::stdout);

    let console_layer = fmt::layer()
        .event_format(ConsoleFormatter)
        .with_writer(make_writer)
        .with_ansi(std::io::IsTerminal::is_terminal(&std::io::stdout()))
        .with_filter(console_filter);

    let file_layer = FileLayer::new(command).map(|l| l.with_filter(LevelFilter::DEBUG));

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .ok();
}
