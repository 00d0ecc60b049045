use clap::Parser;

use treepane::app::{AppConfig, TreePaneApp};

fn main() {
    let _ = env_logger::builder().format_timestamp(None).try_init();

    let config = AppConfig::parse();
    if let Err(err) = TreePaneApp::run(&config) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
