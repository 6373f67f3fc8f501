mod commands;
mod store;
mod terminal;

use commands::{CommandLine, Commands, exclusions, scan};
use terminal::{logging, print};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let commands = CommandLine::parse_args();

    logging::init_logging(commands.verbose);

    match commands.command {
        Commands::Scan(args) => {
            print::header("starting scanner");
            scan::scan(args).await
        }
        Commands::Exclusions => {
            print::header("skipped address space");
            exclusions::exclusions()
        }
    }
}
