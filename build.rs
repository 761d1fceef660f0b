//! Build script rendering the `pxrun` man page into the build output
//! directory with clap-mangen.

use std::env;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

use cli::Cli;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = std::io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let out_dir = env::var_os("OUT_DIR").map(PathBuf::from).ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, "OUT_DIR was not set")
    })?;

    let mut page = Vec::new();
    Man::new(Cli::command()).render(&mut page)?;
    File::create(out_dir.join("pxrun.1"))?.write_all(&page)?;

    Ok(())
}
