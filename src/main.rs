mod cli;
mod core;
mod plot;
mod report;

fn main() -> anyhow::Result<()> {
    cli::run::entry()
}
