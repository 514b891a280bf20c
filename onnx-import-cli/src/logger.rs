use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::config::{Appender, Root};
use log4rs::encode::pattern::PatternEncoder;
use log4rs::Config;

/// Initialize logging to stderr at the given level.
///
/// Output goes to stderr so that it does not mix with the IR when writing to
/// stdout.
pub fn init_log(level: LevelFilter) -> Result<(), Box<dyn std::error::Error>> {
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new("[{h({l})} {t}] {m}{n}")))
        .build();
    let appender = Appender::builder().build("stderr", Box::new(stderr));
    let config = Config::builder()
        .appender(appender)
        .build(Root::builder().appender("stderr").build(level))?;
    log4rs::init_config(config)?;

    update_panic_hook();

    Ok(())
}

fn update_panic_hook() {
    let hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |info| {
        log::error!("PANIC => {}", info);
        hook(info);
    }));
}
