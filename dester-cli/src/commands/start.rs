//! `dester start`: run the service in the foreground.

use anyhow::{Context, Result};

pub fn run() -> Result<()> {
    let home = dirs::home_dir().context("could not determine home directory")?;
    dester_startup::start_blocking(&home).context("service exited with error")?;
    Ok(())
}
