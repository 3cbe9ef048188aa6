extern crate clap;
#[macro_use]
extern crate crossbeam;
extern crate ctrlc;
extern crate env_logger;
#[macro_use]
extern crate log;
extern crate tapstack;

use std::env;
use std::io;
use std::process;
use std::str::FromStr;
use std::time::Duration;

use crossbeam::channel;
use log::LevelFilter;

use tapstack::config::{
    self,
    Config,
};
use tapstack::core::monitor::Status;
use tapstack::core::repr::{
    EthernetAddress,
    Ipv4Address,
};
use tapstack::core::service::icmpv4;
use tapstack::core::stack::Stack;
use tapstack::{
    Error,
    Result,
};

const STATUS_INTERVAL: Duration = Duration::from_secs(1);

const PING_ID: u16 = 0x7470;

fn app<'a, 'b>() -> clap::App<'a, 'b> {
    clap::App::new("tapstackd")
        .about("User space IPv4 stack on a Linux TAP interface")
        .arg(
            clap::Arg::with_name("config")
                .long("config")
                .short("c")
                .value_name("FILE")
                .help("TOML configuration, overrides the device options")
                .takes_value(true),
        )
        .arg(
            clap::Arg::with_name("tap")
                .long("tap")
                .value_name("TAP")
                .help("Linux TAP interface")
                .default_value(config::DEFAULT_TAP)
                .takes_value(true),
        )
        .arg(
            clap::Arg::with_name("dev-mac")
                .long("dev-mac")
                .value_name("MAC")
                .help("MAC address of the device")
                .default_value("06:11:22:33:44:55")
                .takes_value(true),
        )
        .arg(
            clap::Arg::with_name("dev-ipv4")
                .long("dev-ipv4")
                .value_name("IPV4")
                .help("IPv4 address of the device")
                .default_value("10.0.0.102")
                .takes_value(true),
        )
        .arg(
            clap::Arg::with_name("prefix-len")
                .long("prefix-len")
                .value_name("LEN")
                .help("Prefix length of the device network")
                .default_value("24")
                .takes_value(true),
        )
        .arg(
            clap::Arg::with_name("gateway")
                .long("gateway")
                .value_name("IPV4")
                .help("Default gateway")
                .default_value("10.0.0.101")
                .takes_value(true),
        )
        .arg(
            clap::Arg::with_name("ping")
                .long("ping")
                .value_name("IPV4")
                .help("Sends an echo request every second")
                .takes_value(true),
        )
        .arg(
            clap::Arg::with_name("verbose")
                .long("verbose")
                .short("v")
                .help("Logs at debug level"),
        )
}

fn arg<T: FromStr>(matches: &clap::ArgMatches, name: &str) -> Result<T> {
    let value = matches.value_of(name).unwrap_or("");
    value
        .parse()
        .map_err(|_| Error::Config(format!("bad --{} {:?}", name, value)))
}

fn load_config(matches: &clap::ArgMatches) -> Result<Config> {
    if let Some(path) = matches.value_of("config") {
        return Config::from_file(path);
    }

    let prefix_len: u32 = arg(matches, "prefix-len")?;
    if prefix_len > 32 {
        return Err(Error::Config(format!("bad --prefix-len {}", prefix_len)));
    }

    Ok(Config::single_tap(
        matches.value_of("tap").unwrap_or(config::DEFAULT_TAP),
        arg::<EthernetAddress>(matches, "dev-mac")?,
        arg::<Ipv4Address>(matches, "dev-ipv4")?,
        Ipv4Address::netmask(prefix_len),
        arg::<Ipv4Address>(matches, "gateway")?,
    ))
}

fn init_logger(verbose: bool) {
    let mut builder = env_logger::Builder::new();

    match env::var("RUST_LOG") {
        Ok(filters) => {
            builder.parse(&filters);
        }
        Err(_) => {
            let level = if verbose {
                LevelFilter::Debug
            } else {
                LevelFilter::Info
            };
            builder.filter(None, level);
        }
    }

    builder.init();
}

fn run(matches: &clap::ArgMatches) -> Result<()> {
    let config = load_config(matches)?;
    let ping_dst = match matches.value_of("ping") {
        Some(_) => Some(arg::<Ipv4Address>(matches, "ping")?),
        None => None,
    };

    let (shutdown_tx, shutdown_rx) = channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.try_send(());
    })
    .map_err(|err| Error::SyscallError(io::Error::new(io::ErrorKind::Other, err.to_string())))?;

    let mut stack = Stack::from_config(&config)?;
    stack.start()?;

    let ticker = channel::tick(STATUS_INTERVAL);
    let mut seq: u16 = 0;

    loop {
        select! {
            recv(shutdown_rx) -> _ => {
                info!("Received termination signal.");
                break;
            }
            recv(ticker) -> _ => {
                if stack.status() == Status::Red {
                    stack.stop();
                    return Err(Error::WorkerFailed);
                }

                if let (Some(dst), Some(sender)) = (ping_dst, stack.sender()) {
                    seq = seq.wrapping_add(1);
                    let request = icmpv4::ping(Ipv4Address::UNSPECIFIED, dst, PING_ID, seq, b"tapstack")?;
                    if sender.try_send(request).is_err() {
                        warn!("Dropped echo request {} to {}.", seq, dst);
                    } else {
                        info!("Sent echo request {} to {}.", seq, dst);
                    }
                }
            }
        }
    }

    stack.stop();
    Ok(())
}

fn main() {
    let matches = app().get_matches();
    init_logger(matches.is_present("verbose"));

    if let Err(err) = run(&matches) {
        error!("tapstackd failed with {}.", err);
        process::exit(1);
    }
}
