use anyhow::Result;
use clap::Parser;

use movie_shelf::config::{Args, Config};
use movie_shelf::emit;

fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::try_from_args(&args)?;
    emit::generate_shelf(&config)
}
