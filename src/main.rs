#![deny(clippy::unwrap_used)]

use clap::{arg, command, value_parser};
use std::process::exit;

pub mod device;
pub mod proto;
pub mod transport;

use crate::device::PowerMeter;
use crate::proto::{Result, Value};

#[cfg(unix)]
const DEFAULT_TTY: &str = "/dev/usbtmc0";
#[cfg(windows)]
const DEFAULT_TTY: &str = "COM1";

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let matches = command!() // requires `cargo` feature
        .arg(
            arg!([DEVICE] "Power meter device node")
                .default_value(DEFAULT_TTY),
        )
        .arg(
            arg!(
                -b --baudrate <BAUDRATE> "Baud rate for serial device nodes"
            )
            .required(false)
            .value_parser(value_parser!(u32)),
        )
        .arg(
            arg!(
                -m --pmtype <TYPE> "Power meter type hint (e.g. wt310), skips auto-detection"
            )
            .required(false),
        )
        .arg(arg!(
            -d --debug ... "Turn debugging information on"
        ))
        .subcommand(clap::Command::new("info").about("Device identification and installed options"))
        .subcommand(
            clap::Command::new("get")
                .about("Read a power meter property")
                .arg(arg!(<PROPERTY> "Property name, e.g. 'current-range'")),
        )
        .subcommand(
            clap::Command::new("set")
                .about("Change a power meter property")
                .arg(arg!(<PROPERTY> "Property name, e.g. 'current-range'"))
                .arg(arg!(<VALUE> "The value to set")),
        )
        .subcommand(
            clap::Command::new("read")
                .about("Read measurement data")
                .arg(arg!(<ITEMS> "Comma-separated data items, e.g. 'P,I,V'"))
                .arg(
                    arg!(-c --count <COUNT> "How many samples to read")
                        .default_value("1")
                        .value_parser(value_parser!(u64)),
                ),
        )
        .subcommand(
            clap::Command::new("integration")
                .about("Control the integration feature")
                .arg(
                    arg!(<ACTION> "What to do")
                        .value_parser(["start", "stop", "reset", "state"]),
                ),
        )
        .subcommand(
            clap::Command::new("command")
                .about("Run a library command by name")
                .arg(arg!(<NAME> "Command name, e.g. 'get-crest-factor'"))
                .arg(arg!([ARG] "Optional command argument")),
        )
        .subcommand(clap::Command::new("commands").about("List the supported commands"))
        .subcommand_required(true)
        .get_matches();

    let level = match matches.get_count("debug") {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(level).init();

    if let Err(err) = run(&matches).await {
        eprintln!("wtctrl: {err}");
        exit(1);
    }
}

async fn run(matches: &clap::ArgMatches) -> Result<()> {
    let devnode = matches
        .get_one::<String>("DEVICE")
        .map(String::as_str)
        .unwrap_or(DEFAULT_TTY);
    let baudrate = matches.get_one::<u32>("baudrate").copied();
    let pmtype = matches.get_one::<String>("pmtype").map(String::as_str);

    let mut meter = PowerMeter::open(devnode, baudrate, pmtype).await?;
    log::debug!("{devnode}: detected a {}", meter.model());

    match matches.subcommand() {
        Some(("info", _args)) => {
            if let Some(id) = meter.command("get-id", None).await? {
                println!("ID: {id}");
            }
            println!("Model: {}", meter.model());
            if let Some(opts) = meter.command("get-installed-opts", None).await? {
                println!("Installed options: {opts}");
            }
        }
        Some(("get", args)) => {
            let property = args.get_one::<String>("PROPERTY").expect("required arg");
            let response = meter.command(&format!("get-{property}"), None).await?;
            if let Some(response) = response {
                println!("{response}");
            }
        }
        Some(("set", args)) => {
            let property = args.get_one::<String>("PROPERTY").expect("required arg");
            let value = args.get_one::<String>("VALUE").expect("required arg");
            meter
                .command(&format!("set-{property}"), Some(Value::from(value.as_str())))
                .await?;
        }
        Some(("read", args)) => {
            let items: Vec<String> = args
                .get_one::<String>("ITEMS")
                .expect("required arg")
                .split(',')
                .map(str::to_string)
                .collect();
            let count = *args.get_one::<u64>("count").expect("defaulted arg");

            meter
                .command("configure-data-items", Some(Value::List(items)))
                .await?;
            for _ in 0..count {
                meter.command("wait-data-update", None).await?;
                if let Some(Value::List(values)) = meter.command("read-data", None).await? {
                    println!("{}", values.join(","));
                }
            }
        }
        Some(("integration", args)) => {
            let action = args.get_one::<String>("ACTION").expect("required arg");
            if action == "state" {
                if let Some(state) = meter.command("get-integration-state", None).await? {
                    println!("{state}");
                }
            } else {
                meter.command(&format!("{action}-integration"), None).await?;
            }
        }
        Some(("command", args)) => {
            let name = args.get_one::<String>("NAME").expect("required arg");
            let arg = args
                .get_one::<String>("ARG")
                .map(|arg| Value::from(arg.as_str()));
            if let Some(response) = meter.command(name, arg).await? {
                println!("{response}");
            }
        }
        Some(("commands", _args)) => {
            for (name, descr) in meter.commands() {
                println!("{name} - {descr}");
                if let Ok(help) = meter.get_argument_help(name) {
                    if !help.contains('\n') {
                        println!("    values: {help}");
                    }
                }
            }
        }
        _ => unreachable!("a subcommand is required"),
    }

    Ok(())
}
