//! Kernel logger for the [`log`] facade.
//!
//! The embedding kernel installs a console sink (usually the UART)
//! using [`init`], every record is then printed as
//! `[ LEVEL ] [module::path] message`.

use core::fmt::Arguments;
use spin::Once;

/// A function that writes formatted text to the console.
pub type Sink = fn(Arguments<'_>);

static SINK: Once<Sink> = Once::new();
static LOGGER: Logger = Logger;

struct Logger;

impl log::Log for Logger {
    #[allow(unused_variables)]
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        #[cfg(any(debug_assertions, feature = "logging"))]
        return true;
        #[cfg(all(not(debug_assertions), not(feature = "logging")))]
        return metadata.level() <= log::Level::Info;
    }

    fn log(&self, record: &log::Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }

        if let Some(sink) = SINK.get() {
            let mod_path = record
                .module_path_static()
                .or_else(|| record.module_path())
                .unwrap_or("<n/a>");

            sink(format_args!(
                "[ {:>5} ] [{}] {}\n",
                record.level(),
                mod_path,
                record.args()
            ));
        }
    }

    fn flush(&self) {}
}

/// Install the logger, printing every record to `sink`.
///
/// Fails if any logger was installed already.
pub fn init(sink: Sink) -> Result<(), log::SetLoggerError> {
    SINK.call_once(|| sink);
    log::set_logger(&LOGGER)?;
    log::set_max_level(log::LevelFilter::Trace);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use spin::Mutex;

    static OUTPUT: Mutex<String> = Mutex::new(String::new());

    fn capture(args: Arguments<'_>) {
        use core::fmt::Write;
        let _ = OUTPUT.lock().write_fmt(args);
    }

    #[test]
    fn records_are_formatted() {
        init(capture).unwrap();
        assert!(init(capture).is_err());

        log::info!("frame table has {} entries", 16);
        log::warn!("nothing to check");

        let output = OUTPUT.lock();
        assert!(output.contains("[  INFO ] [windy_pmem::logging::tests] frame table has 16 entries\n"));
        assert!(output.contains("[  WARN ] [windy_pmem::logging::tests] nothing to check\n"));
    }
}
