//! Example: Discovering services and characteristics
//!
//! Usage: `cargo run --example discover -- <address> [public|random] [hciN]`

use rustygatt::{AddressType, ConnectOptions, GattRequester, RequesterConfig};
use std::env;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args = env::args().skip(1);
    let address = args
        .next()
        .ok_or("usage: discover <address> [public|random] [hciN]")?;
    let address_type: AddressType = match args.next() {
        Some(kind) => kind.parse()?,
        None => AddressType::Public,
    };
    let device = args.next().unwrap_or_else(|| "hci0".to_string());

    let config = RequesterConfig {
        device,
        address_type,
        ..Default::default()
    };
    let requester = GattRequester::new(&address, config)?;

    println!("Connecting to {}...", requester.peer());
    requester.connect(ConnectOptions {
        wait: true,
        channel_type: Some(address_type),
        ..Default::default()
    })?;

    let mtu = requester.exchange_mtu(247)?;
    println!("Negotiated MTU: {}", mtu);

    for service in requester.discover_primary()? {
        println!("{}", service);
        for characteristic in
            requester.discover_characteristics(service.start, service.end, None)?
        {
            println!("    {}", characteristic);
        }
    }

    requester.disconnect()?;
    Ok(())
}
