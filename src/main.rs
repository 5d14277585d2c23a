const DEFAULT_LOG_PATH: &str = "server.log";
const DEFAULT_CONFIG_PATH: &str = "config.yaml";

fn main() {
    if let Err(e) = sokd::logging::init(DEFAULT_LOG_PATH) {
        eprintln!("failed to initialize logging at {DEFAULT_LOG_PATH}: {e}");
        std::process::exit(1);
    }

    let config_path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let code = sokd::supervisor::run(&config_path);
    std::process::exit(code);
}
