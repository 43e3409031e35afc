//! Build script rendering the `labship` manual pages.
//!
//! Writes `labship.1` plus one `labship-<subcommand>.1` page per subcommand
//! into the build output directory for packaging.

use std::env;
use std::io::{self, Write};

use camino::Utf8PathBuf;
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;
use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

use cli::Cli;

fn render(man: Man) -> io::Result<Vec<u8>> {
    let mut page = Vec::new();
    man.render(&mut page)?;
    Ok(page)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let out_dir = env::var("OUT_DIR")
        .map(Utf8PathBuf::from)
        .map_err(|err| io::Error::new(io::ErrorKind::NotFound, format!("OUT_DIR: {err}")))?;
    let dir = Dir::open_ambient_dir(&out_dir, ambient_authority())?;

    let command = Cli::command();
    for sub in command.get_subcommands() {
        let name = format!("labship-{}", sub.get_name());
        let page = render(Man::new(sub.clone()).title(name.as_str()))?;
        dir.write(format!("{name}.1"), page)?;
    }
    dir.write("labship.1", render(Man::new(command))?)?;

    Ok(())
}
