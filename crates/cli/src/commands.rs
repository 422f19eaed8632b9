//! Clap command tree definition.
//!
//! `-h` names the seed host, so the automatic help flag is replaced by a
//! long-only `--help` at the top level.

use clap::{Arg, ArgAction, Command};

/// Build the complete CLI command tree.
pub fn build_cli() -> Command {
    Command::new("aerie")
        .about("Command-line client for Aerospike-compatible clusters")
        .disable_help_flag(true)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("help")
                .long("help")
                .help("Print help")
                .action(ArgAction::Help),
        )
        .arg(
            Arg::new("host")
                .short('h')
                .long("host")
                .help("Seed hosts as h1[:port],h2 (default: $AEROSPIKE_HOSTS or localhost)"),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .help("Port for hosts that do not name one")
                .value_parser(clap::value_parser!(u16))
                .default_value("3000"),
        )
        .arg(
            Arg::new("timeout")
                .short('t')
                .long("timeout")
                .help("Per-attempt timeout in milliseconds")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("namespace")
                .short('n')
                .long("namespace")
                .help("Namespace")
                .default_value("test"),
        )
        .arg(
            Arg::new("set")
                .short('s')
                .long("set")
                .help("Set name (default: none)"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .help("0 off, 1 error, 2 warn, 3 info, 4 debug, 5 trace (default: $RUST_LOG)")
                .value_parser(clap::value_parser!(u8).range(0..=5)),
        )
        .arg(Arg::new("user").short('U').long("user").help("User name"))
        .arg(
            Arg::new("password")
                .short('P')
                .long("password")
                .help("Password for --user"),
        )
        .subcommand(
            Command::new("get")
                .about("Read a record")
                .arg(key_arg()),
        )
        .subcommand(
            Command::new("put")
                .about("Write bins given as a JSON object")
                .arg(key_arg())
                .arg(
                    Arg::new("bins")
                        .required(true)
                        .help("JSON object, e.g. '{\"a\": 1}'"),
                ),
        )
        .subcommand(
            Command::new("remove")
                .about("Delete a record")
                .arg(key_arg()),
        )
        .subcommand(
            Command::new("exists")
                .about("Check whether a record exists")
                .arg(key_arg()),
        )
        .subcommand(
            Command::new("execute")
                .about("Run a record UDF")
                .arg(key_arg())
                .arg(Arg::new("module").required(true).help("UDF module"))
                .arg(Arg::new("function").required(true).help("UDF function"))
                .arg(
                    Arg::new("args")
                        .num_args(0..)
                        .help("Arguments, auto-typed (42, 1.5, true, null, JSON, text)"),
                ),
        )
        .subcommand(
            Command::new("info")
                .about("Send an info request to one node")
                .arg(Arg::new("request").help("Request name (default: statistics)")),
        )
        .subcommand(Command::new("scan").about("Print every record in the namespace/set"))
}

fn key_arg() -> Arg {
    Arg::new("key")
        .required(true)
        .help("User key; integer-looking keys are sent as integers")
}
