//! Optional log4rs-backed file logger, initialized by callers that want diagnostics written
//! next to the store file rather than to stderr.
//!
//! Built on `FileAppender` + `PatternEncoder`, narrowed to a single log file scoped to the
//! store's own path rather than a rolling per-database folder.

use log::LevelFilter;
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::path::Path;

/// Initializes logging to `<store_path>.log`. Safe to call once per process; a second call
/// returns an error from `log4rs::init_config` rather than panicking.
pub fn init_for_store(store_path: &Path, level: LevelFilter) -> Result<(), Box<dyn std::error::Error>> {
    let log_path = store_path.with_extension("log");
    let encoder = Box::new(PatternEncoder::new("{d(%Y-%m-%d %H:%M:%S%.3f)} [{l}] {t} - {m}{n}"));
    let file_appender = FileAppender::builder().encoder(encoder).build(log_path)?;
    let config = Config::builder()
        .appender(Appender::builder().build("file", Box::new(file_appender)))
        .build(Root::builder().appender("file").build(level))?;
    log4rs::init_config(config)?;
    Ok(())
}
