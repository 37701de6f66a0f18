//! Console log format for the msgframe binary.
//!
//! Lines read `time component level message key=value...`, where the
//! component column comes from a `component` field on the event.

use std::fmt::{self, Write as _};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::{format::Writer, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

const COMPONENT_WIDTH: usize = 20;
const LEVEL_WIDTH: usize = 9;

const RESET: &str = "\x1b[0m";
const DIM: &str = "\x1b[2m";

/// How one level is shown in the level column
struct LevelStyle {
    label: &'static str,
    ansi: &'static str,
}

fn level_style(level: &Level) -> LevelStyle {
    let (label, ansi) = match *level {
        Level::ERROR => ("✗ ERROR", "\x1b[91m"),
        Level::WARN => ("⚠ WARN", "\x1b[93m"),
        Level::INFO => ("ℹ INFO", "\x1b[32m"),
        Level::DEBUG => ("· DEBUG", "\x1b[90m"),
        Level::TRACE => ("· TRACE", "\x1b[90m"),
    };
    LevelStyle { label, ansi }
}

/// ANSI escapes, or nothing when output is not a terminal
#[derive(Clone, Copy)]
struct Palette {
    enabled: bool,
}

impl Palette {
    fn detect() -> Self {
        let enabled = std::env::var("TERM").is_ok_and(|term| term != "dumb");
        Self { enabled }
    }

    fn paint(self, code: &'static str) -> &'static str {
        if self.enabled {
            code
        } else {
            ""
        }
    }
}

/// Pad `text` to `width` characters, cutting it with an ellipsis if longer
fn column(text: &str, width: usize) -> String {
    if text.chars().count() > width {
        let mut cut: String = text.chars().take(width - 1).collect();
        cut.push('…');
        cut
    } else {
        format!("{:<width$}", text, width = width)
    }
}

/// Event formatter installed by `main`
pub struct MsgframeLogFormatter {
    service: String,
    palette: Palette,
}

impl MsgframeLogFormatter {
    pub fn new(service: String) -> Self {
        Self {
            service,
            palette: Palette::detect(),
        }
    }

    fn component_column(&self, component: Option<&str>) -> String {
        match component {
            Some(component) => column(&format!("{}-{}", self.service, component), COMPONENT_WIDTH),
            None => column(&self.service, COMPONENT_WIDTH),
        }
    }

    fn write_line(&self, out: &mut impl fmt::Write, level: &Level, fields: &EventFields) -> fmt::Result {
        let style = level_style(level);
        let timestamp = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f");

        write!(
            out,
            "{dim}{timestamp}{reset} {component} {color}{level}{reset} {message}",
            dim = self.palette.paint(DIM),
            reset = self.palette.paint(RESET),
            color = self.palette.paint(style.ansi),
            component = self.component_column(fields.component.as_deref()),
            level = column(style.label, LEVEL_WIDTH),
            message = fields.message,
        )?;
        if !fields.extra.is_empty() {
            write!(out, " {}{}{}", self.palette.paint(DIM), fields.extra, self.palette.paint(RESET))?;
        }
        writeln!(out)
    }
}

impl<S, N> FormatEvent<S, N> for MsgframeLogFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut fields = EventFields::default();
        event.record(&mut fields);
        self.write_line(&mut writer, event.metadata().level(), &fields)
    }
}

/// Message, component and the remaining fields of one event
#[derive(Default)]
struct EventFields {
    message: String,
    component: Option<String>,
    extra: String,
}

impl EventFields {
    fn record(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.message = value,
            "component" => self.component = Some(value),
            name => {
                if !self.extra.is_empty() {
                    self.extra.push(' ');
                }
                let _ = write!(self.extra, "{}={}", name, value);
            }
        }
    }
}

impl Visit for EventFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.record(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.record(field, format!("{:?}", value));
    }
}

#[macro_export]
macro_rules! component_event {
    ($level:ident, $component:expr, $($arg:tt)*) => {
        tracing::$level!(component = $component, $($arg)*)
    };
}

/// `info!` tagged with a component
#[macro_export]
macro_rules! component_info {
    ($component:expr, $($arg:tt)*) => { $crate::component_event!(info, $component, $($arg)*) };
}

/// `warn!` tagged with a component
#[macro_export]
macro_rules! component_warn {
    ($component:expr, $($arg:tt)*) => { $crate::component_event!(warn, $component, $($arg)*) };
}

/// `debug!` tagged with a component
#[macro_export]
macro_rules! component_debug {
    ($component:expr, $($arg:tt)*) => { $crate::component_event!(debug, $component, $($arg)*) };
}

/// `error!` tagged with a component
#[macro_export]
macro_rules! component_error {
    ($component:expr, $($arg:tt)*) => { $crate::component_event!(error, $component, $($arg)*) };
}
