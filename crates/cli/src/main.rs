//! Aerie CLI: one command against a cluster, then exit.
//!
//! ```text
//! aerie -h 10.0.0.1:3000 -n test -s demo put 7 '{"a": 1}'
//! aerie -s demo get 7
//! aerie info build
//! ```
//!
//! Exit code 0 on success or `--help`, 1 on bad arguments or failure.

mod commands;
mod format;
mod parse;
mod value;

use std::process;

use futures::StreamExt;
use tracing_subscriber::EnvFilter;

use aerie_client::{Client, Scan};
use aerie_core::Error;

use commands::build_cli;
use format::{format_error, format_info, format_record, format_value};
use parse::{matches_to_action, matches_to_settings, CliAction};

fn main() {
    let matches = match build_cli().try_get_matches() {
        Ok(m) => m,
        Err(e) => {
            let _ = e.print();
            let code = match e.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            process::exit(code);
        }
    };

    let settings = matches_to_settings(&matches);
    init_tracing(settings.log_level);

    let action = match matches_to_action(&matches) {
        Ok(a) => a,
        Err(msg) => {
            eprintln!("(error) {}", msg);
            process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("(error) failed to start runtime: {}", e);
            process::exit(1);
        }
    };

    let exit_code = runtime.block_on(async {
        let client = match Client::connect(&settings.config).await {
            Ok(c) => c,
            Err(e) => {
                eprintln!("{}", format_error(&e));
                return 1;
            }
        };
        let code = match run_action(&client, action).await {
            Ok(()) => 0,
            Err(e) => {
                eprintln!("{}", format_error(&e));
                1
            }
        };
        client.close();
        code
    });
    process::exit(exit_code);
}

/// `-l` wins over `RUST_LOG`; without either only warnings are shown.
fn init_tracing(level: Option<u8>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level_directive(level)),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn level_directive(level: u8) -> &'static str {
    match level {
        0 => "off",
        1 => "error",
        2 => "warn",
        3 => "info",
        4 => "debug",
        _ => "trace",
    }
}

async fn run_action(client: &Client, action: CliAction) -> Result<(), Error> {
    match action {
        CliAction::Get(key) => {
            let record = client.get(&key).await?;
            println!("{}", format_record(&record));
        }
        CliAction::Put(key, bins) => {
            client.put(&key, &bins).await?;
            println!("OK");
        }
        CliAction::Remove(key) => {
            let removed = client.remove(&key).await?;
            println!("{}", removed);
        }
        CliAction::Exists(key) => {
            let found = client.exists(&key).await?;
            println!("{}", found);
        }
        CliAction::Execute {
            key,
            module,
            function,
            args,
        } => {
            let v = client.apply(&key, &module, &function, &args).await?;
            println!("{}", format_value(&v));
        }
        CliAction::Info(request) => {
            let command = request.as_deref().unwrap_or("statistics");
            let map = client.info_any(&[command]).await?;
            println!("{}", format_info(&map));
        }
        CliAction::Scan { namespace, set } => {
            let mut stream = client.scan(&Scan::new(&namespace, set.as_deref()))?;
            let mut count = 0usize;
            while let Some(record) = stream.next().await {
                println!("{}", format_record(&record?));
                count += 1;
            }
            eprintln!("{} records", count);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_directives() {
        assert_eq!(level_directive(0), "off");
        assert_eq!(level_directive(2), "warn");
        assert_eq!(level_directive(5), "trace");
    }
}
