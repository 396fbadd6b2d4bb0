use clap::Parser;

fn main() {
    let args = xout2coff::cli::Args::parse();
    if let Err(err) = xout2coff::run(args) {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}
