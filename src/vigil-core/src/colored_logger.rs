//! Colored log output with a component tag per line

use owo_colors::{OwoColorize, Style};
use std::fmt;
use std::io;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::{
    format::{FormatEvent, FormatFields, Writer},
    FmtContext,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

/// Component identifier for prefixing logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    /// One-shot commands and startup
    Main,
    /// The scan loop
    Scan,
    /// Model download and loading
    Model,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Main => "MAIN",
            Component::Scan => "SCAN",
            Component::Model => "MODEL",
        }
    }

    pub fn color_style(&self) -> Style {
        match self {
            Component::Main => Style::new().cyan().bold(),
            Component::Scan => Style::new().green().bold(),
            Component::Model => Style::new().magenta().bold(),
        }
    }
}

/// Event formatter: `HH:MM:SS [TAG] LEVEL fields`
pub struct ColoredFormatter {
    pub component: Component,
}

impl<S, N> FormatEvent<S, N> for ColoredFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let now = chrono::Local::now();
        write!(writer, "{} ", now.format("%H:%M:%S").dimmed())?;

        let prefix = format!("[{:5}]", self.component.as_str());
        write!(writer, "{} ", prefix.style(self.component.color_style()))?;

        match *event.metadata().level() {
            Level::ERROR => write!(writer, "{} ", "ERROR".red().bold())?,
            Level::WARN => write!(writer, "{} ", "WARN ".yellow().bold())?,
            Level::INFO => write!(writer, "{} ", "INFO ".green().bold())?,
            Level::DEBUG => write!(writer, "{} ", "DEBUG".blue().bold())?,
            Level::TRACE => write!(writer, "{} ", "TRACE".dimmed().bold())?,
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Log filter: `RUST_LOG` when set, otherwise `info`, or `debug` when verbose
pub fn build_filter(verbose: bool, rust_log: Option<&str>) -> EnvFilter {
    let default = if verbose { "debug" } else { "info" };
    match rust_log {
        Some(directives) if !directives.trim().is_empty() => {
            EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new(default))
        }
        _ => EnvFilter::new(default),
    }
}

/// Install the colored subscriber for this process
pub fn init_component_logger(component: Component, verbose: bool) -> anyhow::Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let fmt_layer = tracing_subscriber::fmt::layer()
        .event_format(ColoredFormatter { component })
        .with_writer(io::stdout);

    let rust_log = std::env::var("RUST_LOG").ok();
    tracing_subscriber::registry()
        .with(build_filter(verbose, rust_log.as_deref()))
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}
