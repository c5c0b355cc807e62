//! Drives a balloon over an emulated guest from stdin.
//!
//! ```text
//! balloon-ctl [--config <path>] [<nr_pages> <max_pfn> <max_low_pfn>]
//! ```

use std::{
    io::{self, BufRead, Write},
    time::Duration,
};

use log::{error, info, warn};
use xen_balloon::{
    emulated::{EmulatedGuest, EmulatedStore},
    Balloon, BalloonConfig, BalloonError, BootInfo, ConfigLoader, Pfn, Privilege,
};

/// 64 MiB resident out of 128 MiB, 96 MiB directly addressable.
const DEFAULT_BOOT: BootInfo = BootInfo {
    nr_pages: 16384,
    max_pfn: 32768,
    max_low_pfn: 24576,
};
const SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

const HELP: &str = "commands:
  write <size>        write a memory size to the control file
  read                print the status file
  store <bytes>       set the watched target node
  donate <pages>      excise a range for a driver
  return <pfn> <n>    give a donated range back
  headroom <delta>    adjust the driver headroom
  quit";

fn parse_args() -> xen_balloon::Result<(BalloonConfig, BootInfo)> {
    let invalid = |msg: &str| BalloonError::InvalidInput(msg.to_owned());
    let mut args = std::env::args().skip(1).peekable();
    let config = if args.peek().map(String::as_str) == Some("--config") {
        let _flag = args.next();
        let path = args.next().ok_or_else(|| invalid("--config needs a path"))?;
        ConfigLoader::load_from_path(&path)?
    } else {
        ConfigLoader::load_default().unwrap_or_else(|err| {
            warn!("using default config: {err}");
            BalloonConfig::default()
        })
    };

    let layout: Vec<u64> = args
        .map(|arg| arg.parse().map_err(|_err| invalid(&format!("bad page count {arg}"))))
        .collect::<xen_balloon::Result<_>>()?;
    let boot = match layout[..] {
        [] => DEFAULT_BOOT,
        [nr_pages, max_pfn, max_low_pfn] => BootInfo::new(nr_pages, max_pfn, max_low_pfn),
        _ => return Err(invalid("expected <nr_pages> <max_pfn> <max_low_pfn>")),
    };
    Ok((config, boot))
}

fn execute(
    balloon: &Balloon<EmulatedGuest>,
    store: &EmulatedStore,
    target_key: &str,
    line: &str,
) -> Result<(), String> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(());
    };
    let mut arg = |name: &str| {
        words
            .next()
            .ok_or_else(|| format!("{command}: missing <{name}>"))
    };

    match command {
        "write" => {
            let size = arg("size")?;
            let input = format!("{size}\n");
            balloon
                .control()
                .write(Privilege::Admin, input.as_bytes())
                .map_err(|err| format!("write failed: {err} (errno {})", err.to_errno()))?;
        }
        "read" => print!("{}", balloon.control().read()),
        "store" => store.write(target_key, arg("bytes")?),
        "donate" => {
            let pages = parse_number(arg("pages")?)?;
            let base = balloon.donate_range(pages).map_err(|err| err.to_string())?;
            println!("donated range at {base}");
        }
        "return" => {
            let base = parse_number(arg("pfn")?)?;
            let pages = parse_number(arg("n")?)?;
            balloon
                .return_range(Pfn(base), pages)
                .map_err(|err| err.to_string())?;
        }
        "headroom" => {
            let delta = arg("delta")?;
            let delta = delta
                .parse::<i64>()
                .map_err(|err| format!("bad delta {delta}: {err}"))?;
            balloon.adjust_driver_headroom(delta);
        }
        "help" => println!("{HELP}"),
        other => return Err(format!("unknown command {other}, try help")),
    }

    if !balloon.wait_converged(SETTLE_TIMEOUT) {
        warn!("balloon not converged after {SETTLE_TIMEOUT:?}");
    }
    Ok(())
}

fn parse_number(text: &str) -> Result<u64, String> {
    let parsed = match text.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|err| format!("bad number {text}: {err}"))
}

fn main() -> xen_balloon::Result<()> {
    env_logger::init();
    let (config, boot) = parse_args()?;
    let target_key = config.target_key.clone();
    let store = EmulatedStore::new();
    let balloon = Balloon::init_with_store(EmulatedGuest::new(boot), config, &store)?;
    info!("emulated guest ready: {boot:?}");

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim() == "quit" {
            break;
        }
        if let Err(err) = execute(&balloon, &store, &target_key, &line) {
            error!("{err}");
        }
        stdout.flush()?;
        if balloon.is_halted() {
            error!("balloon halted, exiting");
            break;
        }
    }
    Ok(())
}
