//! ArgMatches → connection settings and action conversion.

use clap::ArgMatches;

use aerie_client::ClientConfig;
use aerie_core::{Bins, Key, Value};

use crate::value::{parse_bins, parse_user_key, parse_value};

/// What to do once connected.
#[derive(Debug, Clone, PartialEq)]
pub enum CliAction {
    Get(Key),
    Put(Key, Bins),
    Remove(Key),
    Exists(Key),
    Execute {
        key: Key,
        module: String,
        function: String,
        args: Vec<Value>,
    },
    Info(Option<String>),
    Scan {
        namespace: String,
        set: Option<String>,
    },
}

/// Global flags.
#[derive(Debug, Clone)]
pub struct Settings {
    pub config: ClientConfig,
    pub log_level: Option<u8>,
}

/// Build the client config from the global flags.
pub fn matches_to_settings(matches: &ArgMatches) -> Settings {
    let mut config = match matches.get_one::<String>("host") {
        Some(hosts) => ClientConfig::with_hosts(hosts),
        None => ClientConfig::default(),
    };
    if let Some(port) = matches.get_one::<u16>("port") {
        config.port = *port;
    }
    if let Some(ms) = matches.get_one::<u64>("timeout") {
        let p = &mut config.policies;
        p.read.base.timeout_ms = *ms;
        p.write.base.timeout_ms = *ms;
        p.batch.base.timeout_ms = *ms;
        p.scan.base.timeout_ms = *ms;
        p.query.base.timeout_ms = *ms;
        p.info.timeout_ms = *ms;
    }
    config.user = matches.get_one::<String>("user").cloned();
    config.password = matches.get_one::<String>("password").cloned();
    Settings {
        config,
        log_level: matches.get_one::<u8>("log-level").copied(),
    }
}

/// Convert the selected subcommand into an action.
pub fn matches_to_action(matches: &ArgMatches) -> Result<CliAction, String> {
    let namespace = matches
        .get_one::<String>("namespace")
        .cloned()
        .unwrap_or_else(|| "test".to_string());
    let set = matches.get_one::<String>("set").cloned();
    let key_of = |sub: &ArgMatches| -> Result<Key, String> {
        let raw = sub
            .get_one::<String>("key")
            .ok_or_else(|| "Missing key".to_string())?;
        Key::new(
            namespace.clone(),
            set.clone().unwrap_or_default(),
            parse_user_key(raw),
        )
        .map_err(|e| e.to_string())
    };

    match matches.subcommand() {
        Some(("get", sub)) => Ok(CliAction::Get(key_of(sub)?)),
        Some(("put", sub)) => {
            let raw = sub
                .get_one::<String>("bins")
                .ok_or_else(|| "Missing bins".to_string())?;
            Ok(CliAction::Put(key_of(sub)?, parse_bins(raw)?))
        }
        Some(("remove", sub)) => Ok(CliAction::Remove(key_of(sub)?)),
        Some(("exists", sub)) => Ok(CliAction::Exists(key_of(sub)?)),
        Some(("execute", sub)) => {
            let required = |name: &str| {
                sub.get_one::<String>(name)
                    .cloned()
                    .ok_or_else(|| format!("Missing {}", name))
            };
            let args = sub
                .get_many::<String>("args")
                .map(|vals| vals.map(|s| parse_value(s)).collect())
                .unwrap_or_default();
            Ok(CliAction::Execute {
                key: key_of(sub)?,
                module: required("module")?,
                function: required("function")?,
                args,
            })
        }
        Some(("info", sub)) => Ok(CliAction::Info(sub.get_one::<String>("request").cloned())),
        Some(("scan", _)) => Ok(CliAction::Scan { namespace, set }),
        Some((other, _)) => Err(format!("Unknown command '{}'", other)),
        None => Err("No command given".to_string()),
    }
}
