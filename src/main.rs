use std::path::PathBuf;

use lj_md::app;

// Usage: lj_md [config.toml]
fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    if let Err(e) = app::run(config_path.as_deref()) {
        log::error!("{e}");
        std::process::exit(1);
    }
}
