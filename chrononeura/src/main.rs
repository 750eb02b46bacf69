//! Entrypoint of the chrononeura binary

use dotenvy::dotenv;

mod commands {
    pub(crate) mod normalize;
    pub(crate) mod serve;
}

enum ReturnCode {
    Failure = 1,
}

#[derive(Debug, clap::Parser)]
#[clap(
    name = "chrononeura",
    version,
    about = "ChronoNeura ingest server and command line tools",
    long_about = r#"ChronoNeura ingest server and command line tools

Examples:
    # Run the ingest server
    chrononeura serve --influx-url http://localhost:8086 --influx-org chrononeura \
        --influx-bucket chrono_trace --influx-bucket-sandbox chrono_test

    # Run the ingest server with extra verbose logging
    chrononeura serve -vv

    # Show what a payload normalizes to, without writing it anywhere
    echo '{"measurement": "cpu load", "fields": {"value": "0.5"}}' | chrononeura normalize
"#
)]
struct Config {
    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, clap::Parser)]
#[allow(clippy::large_enum_variant)]
enum Command {
    /// Run the ingest server
    Serve(commands::serve::Config),

    /// Normalize a payload offline and print the result
    Normalize(commands::normalize::Config),
}

fn main() -> Result<(), std::io::Error> {
    // load all environment variables from .env before doing anything
    load_dotenv();

    let config: Config = clap::Parser::parse();

    let tokio_runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    tokio_runtime.block_on(async move {
        fn handle_init_logs(r: Result<(), chrononeura_clap_blocks::logging::Error>) {
            if let Err(e) = r {
                eprintln!("Initializing logs failed: {e}");
                std::process::exit(ReturnCode::Failure as _);
            }
        }

        match config.command {
            None => println!("command required, -h/--help for help"),
            Some(Command::Serve(config)) => {
                handle_init_logs(config.logging_config.install_global_subscriber());
                if let Err(e) = commands::serve::command(config).await {
                    eprintln!("Serve command failed: {e}");
                    std::process::exit(ReturnCode::Failure as _)
                }
            }
            Some(Command::Normalize(config)) => {
                if let Err(e) = commands::normalize::command(config).await {
                    eprintln!("Normalize command failed: {e}");
                    std::process::exit(ReturnCode::Failure as _)
                }
            }
        }
    });

    Ok(())
}

/// Source the .env file before initialising the Config struct - this sets
/// any envs in the file, which the Config struct then uses.
///
/// Precedence is given to existing env variables.
fn load_dotenv() {
    match dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            // a missing env file is not an error, defaults apply
        }
        Err(e) => {
            eprintln!("FATAL Error loading config from: {e}");
            eprintln!("Aborting");
            std::process::exit(1);
        }
    };
}
