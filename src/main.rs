use clap::Parser;
use tracing::error;

mod cmd;

fn main() {
    let cli = cmd::Cli::parse();
    parasol::logger::init_cli_logger(cli.verbose);
    if let Err(e) = cli.run() {
        error!("{}", e);
        std::process::exit(1);
    }
}
