use std::fs;
use std::path::Path;
use std::path::PathBuf;

use clap::Parser;
use clap::Subcommand;
use miette::IntoDiagnostic;
use miette::WrapErr;
use rand::SeedableRng;
use rand::rngs::StdRng;
use spintax::Lexer;
use spintax::Spintax;
use spintax::lex::SyntaxError;
use spintax::parse::ParseError;
use tracing_subscriber::EnvFilter;

/// Compile spintax templates and print random spins of them.
#[derive(Parser, Debug)]
#[command(name = "spintax")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the tokens of a template, one per line.
    Tokenize { filename: PathBuf },
    /// Print the canonical form of a parsed template.
    Parse { filename: PathBuf },
    /// Print random spins of a template.
    Spin {
        filename: PathBuf,

        /// Define a symbol before spinning; may be repeated.
        #[arg(short, long = "define", value_name = "NAME=TEMPLATE", value_parser = parse_definition)]
        defines: Vec<(String, String)>,

        /// Number of spins to print.
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,

        /// Seed for reproducible output.
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn parse_definition(arg: &str) -> Result<(String, String), String> {
    let (name, template) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=TEMPLATE, got `{arg}`"))?;
    if name.is_empty() {
        return Err(format!("missing symbol name in `{arg}`"));
    }
    Ok((name.to_string(), template.to_string()))
}

fn read(filename: &Path) -> miette::Result<String> {
    fs::read_to_string(filename)
        .into_diagnostic()
        .wrap_err_with(|| format!("reading `{}` failed", filename.display()))
}

/// Template errors exit like a compiler would (65); anything else is
/// handed back to miette.
fn fail(e: miette::Error) -> miette::Result<()> {
    if e.downcast_ref::<SyntaxError>().is_some() || e.downcast_ref::<ParseError>().is_some() {
        eprintln!("{e:?}");
        std::process::exit(65);
    }
    Err(e)
}

fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("spintax=warn")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Tokenize { filename } => {
            let file_contents = read(&filename)?;
            for token in Lexer::new(filename.to_str(), &file_contents) {
                match token {
                    Ok(token) => println!("{token}"),
                    Err(e) => return fail(e),
                }
            }
            println!("EOF");
        }
        Commands::Parse { filename } => {
            let file_contents = read(&filename)?;
            match spintax::Parser::new(filename.to_str(), &file_contents).parse() {
                Ok(expression) => println!("{expression}"),
                Err(e) => return fail(e),
            }
        }
        Commands::Spin {
            filename,
            defines,
            count,
            seed,
        } => {
            let file_contents = read(&filename)?;
            let mut spintax = match Spintax::compile_named(filename.to_str(), &file_contents) {
                Ok(spintax) => spintax,
                Err(e) => return fail(e),
            };
            for (name, template) in &defines {
                if let Err(e) = spintax.define(name, template) {
                    return fail(e);
                }
            }

            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            tracing::info!(count, ?seed, symbols = spintax.symbols().len(), "spinning");
            for _ in 0..count {
                match spintax.spin_with(&mut rng) {
                    Ok(text) => println!("{text}"),
                    Err(e) => {
                        eprintln!("{:?}", miette::Report::new(e));
                        std::process::exit(70);
                    }
                }
            }
        }
    }
    Ok(())
}
