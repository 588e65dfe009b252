//! Example: Reading, writing and listening on one characteristic
//!
//! Usage: `cargo run --example read_write -- <address> <handle> [hex value]`
//!
//! Reads the value at `handle`, optionally writes a new one, then prints
//! notifications and indications for ten seconds.

use rustygatt::{ConnectOptions, GattEventHandler, GattRequester, RequesterConfig};
use std::env;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

struct PrintEvents;

impl GattEventHandler for PrintEvents {
    fn on_notification(&self, handle: u16, value: &[u8]) {
        println!("Notification 0x{:04x}: {}", handle, hex::encode(value));
    }

    fn on_indication(&self, handle: u16, value: &[u8]) {
        println!("Indication 0x{:04x}: {}", handle, hex::encode(value));
    }
}

fn parse_handle(s: &str) -> Result<u16, std::num::ParseIntError> {
    match s.strip_prefix("0x") {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args = env::args().skip(1);
    let usage = "usage: read_write <address> <handle> [hex value]";
    let address = args.next().ok_or(usage)?;
    let handle = parse_handle(&args.next().ok_or(usage)?)?;
    let value = args.next().map(hex::decode).transpose()?;

    let requester =
        GattRequester::with_hooks(&address, RequesterConfig::default(), Arc::new(PrintEvents))?;
    requester.connect(ConnectOptions {
        wait: true,
        ..Default::default()
    })?;

    for chunk in requester.read_by_handle(handle)? {
        println!("Value 0x{:04x}: {}", handle, hex::encode(chunk));
    }

    if let Some(value) = value {
        requester.write_by_handle(handle, &value)?;
        println!("Wrote {} bytes", value.len());
    }

    println!("Listening for events...");
    thread::sleep(Duration::from_secs(10));

    requester.disconnect()?;
    Ok(())
}
