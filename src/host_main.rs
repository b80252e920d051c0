// Runs as a browser native messaging host. Stdout belongs to the browser, so nothing here may
// print to it.
#![windows_subsystem = "windows"]

use anyhow::Result;
use clap::Parser;
use insightboard_host::{
    daemon::{args::HostArgs, config::HostConfig, start_daemon},
    utils::{
        dir::create_application_default_path,
        logging::{enable_logging, HOST_PREFIX},
        runtime::single_thread_runtime,
    },
};
use tracing::error;

fn main() -> Result<()> {
    let args = HostArgs::parse();
    let app_dir = args.dir.clone().map_or_else(create_application_default_path, Ok)?;
    enable_logging(HOST_PREFIX, &app_dir.join("logs"), args.log, args.log_console)?;

    let config = HostConfig::from_args(&args);
    let runtime = single_thread_runtime()?;
    let result = runtime
        .block_on(start_daemon(&app_dir, config))
        .inspect_err(|e| error!("Host failed {e:?}"));
    // A blocking stdin read can outlive the host; don't wait for it.
    runtime.shutdown_background();
    result
}
