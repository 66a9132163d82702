use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;

use getopts::{Matches, Options};
use tokio::time::Duration;

pub struct Args {
    pub address: SocketAddr,
    pub config: PathBuf,
    pub selections: PathBuf,
    pub enable_cache: bool,
    pub cache_ttl: Duration,
}

fn opts() -> Options {
    let mut opts = Options::new();
    opts.optflag(
        "h",
        "help",
        concat!("Print the help output of ", env!("CARGO_PKG_NAME")),
    );
    opts.optopt(
        "a",
        "address",
        "Socket address (IP and port) to listen on [Default: 127.0.0.1:8080]",
        "SOCKET_ADDRESS",
    );
    opts.optopt(
        "f",
        "config",
        "TOML file with one [blocks.<id>] table per block [Default: schedule-builder.toml]",
        "PATH",
    );
    opts.optopt(
        "s",
        "selections",
        "Directory selections are stored in [Default: selections]",
        "DIR",
    );
    opts.optflag(
        "c",
        "enable-cache",
        "Enable caching of fetched pages [Default: false]",
    );
    opts.optopt(
        "t",
        "cache-ttl",
        "Time-to-live for cached pages [Default: 3600]",
        "SECONDS",
    );
    opts
}

pub fn parse(args: Vec<String>) -> Args {
    let opts = opts();

    let matches = match opts.parse(args) {
        Ok(matches) => matches,
        Err(fail) => {
            eprintln!("{fail}");
            process::exit(1);
        }
    };

    if matches.opt_present("help") {
        println!("{}", opts.usage(&opts.short_usage(env!("CARGO_PKG_NAME"))));
        process::exit(0);
    }

    let address = or_exit(
        "address",
        matches.opt_get_default("address", SocketAddr::from(([127, 0, 0, 1], 8080))),
    );

    let cache_ttl = Duration::from_secs(or_exit(
        "cache-ttl",
        matches.opt_get_default("cache-ttl", 3600),
    ));

    Args {
        address,
        config: path(&matches, "config", "schedule-builder.toml"),
        selections: path(&matches, "selections", "selections"),
        enable_cache: matches.opt_present("enable-cache"),
        cache_ttl,
    }
}

fn path(matches: &Matches, name: &str, default: &str) -> PathBuf {
    matches
        .opt_str(name)
        .map_or_else(|| PathBuf::from(default), PathBuf::from)
}

fn or_exit<T, E: std::fmt::Display>(name: &str, value: Result<T, E>) -> T {
    match value {
        Ok(value) => value,
        Err(err) => {
            eprintln!("Provided value for option '{name}' is invalid: {err}");
            process::exit(1);
        }
    }
}
