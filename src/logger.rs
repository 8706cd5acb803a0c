use chrono::Local;
use env_logger::fmt::{Color, Style, StyledValue};
use env_logger::Builder;
use log::{Level, LevelFilter};

/// Installs the global logger. `RUST_LOG` still overrides the level.
pub(crate) fn init(debug: bool) -> Result<(), log::SetLoggerError> {
    formatted_local_time_builder("%H:%M:%S.%3f")
        .filter_level(if debug { LevelFilter::Trace } else { LevelFilter::Info })
        .parse_default_env()
        .try_init()
}

fn formatted_local_time_builder(fmt: &'static str) -> Builder {
    let mut builder = Builder::new();

    builder.format(|f, record| {
        use std::io::Write;

        if !is_own_target(record.target()) {
            return Ok(());
        }

        let mut style = f.style();
        let level = colored_level(&mut style, record.level());

        let time = Local::now().format(fmt);

        writeln!(f, "{} {} > {}", time, level, record.args())
    });

    builder
}

fn is_own_target(target: &str) -> bool {
    let crate_target = clap::crate_name!();

    target == crate_target || target.starts_with(&format!("{crate_target}::"))
}

fn colored_level(style: &'_ mut Style, level: Level) -> StyledValue<'_, &'static str> {
    match level {
        Level::Trace => style.set_color(Color::Magenta).value("TRACE"),
        Level::Debug => style.set_color(Color::Blue).value("DEBUG"),
        Level::Info => style.set_color(Color::Green).value("INFO "),
        Level::Warn => style.set_color(Color::Yellow).value("WARN "),
        Level::Error => style.set_color(Color::Red).value("ERROR"),
    }
}
