use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "xout2coff", version, about = "Convert xout objects to coff")]
pub struct Args {
    #[arg(value_name = "INPUT")]
    pub input: String,

    #[arg(short = 'o', long = "output")]
    pub output: Option<String>,

    #[arg(long = "verbose", short = 'v')]
    pub verbose: bool,
}
