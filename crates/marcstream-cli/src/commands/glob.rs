//! `marcstream glob` command implementation

use crate::GlobArgs;
use marcstream_common::{Locator, Result};
use marcstream_engine::{BackendSettings, Backends};
use std::io::Write;
use tracing::debug;

/// Print one resolved locator per line
pub async fn run(args: &GlobArgs) -> Result<()> {
    let locator = Locator::parse(&args.locator)?;
    let backends = Backends::new(BackendSettings::from_env())?;
    let matches = backends.resolve_glob(&locator).await?;
    debug!(matches = matches.len(), "expanded glob");

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for found in matches {
        if args.show_credentials {
            writeln!(out, "{}", found.expose())?;
        } else {
            writeln!(out, "{}", found)?;
        }
    }
    out.flush()?;
    Ok(())
}
