use chrono::Local;
use log::LevelFilter;
use std::io::Write;

const CRATE_TARGET: &str = "biometry_ocr";

/// Initializes the global logger.
///
/// Lines look like `[14:03:22.117] INFO message`. Our own records log at info
/// (debug with `verbose`), dependencies at warn. `RUST_LOG` overrides both.
pub fn init_logging(verbose: bool) {
    let own_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::builder()
        .filter_level(LevelFilter::Warn)
        .filter_module(CRATE_TARGET, own_level)
        .parse_default_env()
        .format(|f, record| {
            let timestamp = Local::now().format("%H:%M:%S%.3f");
            writeln!(f, "[{}] {:<5} {}", timestamp, record.level(), record.args())
        })
        .init();
}
