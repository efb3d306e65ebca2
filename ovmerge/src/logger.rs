use log::{LevelFilter, Log, Metadata, Record};

/// Minimal stderr logger; filtering is done by the `log` facade through the
/// max level set at init.
struct Stderr;

impl Log for Stderr {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        eprintln!(
            "ovmerge: {}: {}",
            record.level().to_string().to_lowercase(),
            record.args()
        );
    }

    fn flush(&self) {}
}

static LOGGER: Stderr = Stderr;

pub fn init(level: LevelFilter) {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}
