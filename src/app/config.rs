use log::error;
use std::io::{self, IsTerminal};
use tokio::runtime::Builder;

use super::args::Args;
use crate::config::Config;

/// Load and validate the config file, exiting with `EX_CONFIG` when it is
/// unusable. With `--test-config` the process exits right after the check.
pub fn init_config(args: &Args) -> Result<Config, Box<dyn std::error::Error>> {
    // A short-lived runtime for the async loader; the server builds its own
    // once the worker count is known.
    let runtime = Builder::new_current_thread().enable_all().build()?;
    let config = match runtime.block_on(crate::config::parse(args.config_file.as_str())) {
        Ok(config) => config,
        Err(err) => {
            if io::stdin().is_terminal() {
                eprintln!("Config parse error: {err}");
            } else {
                error!("Config parse error: {err:?}");
            }
            std::process::exit(exitcode::CONFIG);
        }
    };

    if args.test_config {
        println!("Config {} is valid", config.path);
        std::process::exit(exitcode::OK);
    }
    Ok(config)
}
