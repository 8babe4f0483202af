//! Entry point: parse arguments, initialize logging, bind the listening socket, and run the
//! cooperative poll loop until the listening socket hangs up or errors.

use clap::Parser;
use ctjudge::{config::ServerArgs, poll_loop::PollLoop};
use eyre::{Result, WrapErr};

fn main() -> Result<()> {
	env_logger::init();
	let args = ServerArgs::parse();
	let config = args.into();

	let mut poll_loop = PollLoop::bind(config).wrap_err("failed to start server")?;
	poll_loop.run()
}
