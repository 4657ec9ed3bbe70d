use std::sync::Arc;

use galosh::config::Config;
use galosh::http_server;

fn main() {
    env_logger::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Could not build tokio runtime");

    if let Err(e) = runtime.block_on(http_server::serve(Arc::new(config))) {
        eprintln!("Server error: {e}");
        std::process::exit(1);
    }
}
