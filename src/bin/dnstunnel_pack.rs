//! A small CLI that exercises the frame codec and label packer without
//! touching the network: encode a frame, pack it under a parent zone, and
//! print the resulting DNS name (and, with `--decode`, reverse the trip).
use clap::{App, Arg};
use log::debug;

use dnstunnel::alphabet::Alphabet;
use dnstunnel::error::TunnelResult;
use dnstunnel::frame::{Frame, FrameType};
use dnstunnel::packer::ParentZone;

struct CliOptions {
    zone: String,
    payload: String,
    dense: bool,
    decode: Option<String>,
}

impl CliOptions {
    fn options() -> Self {
        let matches = App::new("dnstunnel-pack")
            .version("0.1")
            .about(
                r#"Pack an arbitrary payload into a DNS query name under a
parent zone, or decode a previously packed name back to bytes."#,
            )
            .arg(
                Arg::new("zone")
                    .short('z')
                    .long("zone")
                    .required(true)
                    .long_help("Parent zone to tunnel under")
                    .takes_value(true),
            )
            .arg(
                Arg::new("payload")
                    .short('p')
                    .long("payload")
                    .default_value("hello")
                    .long_help("Payload string to wrap in a NOP frame and pack")
                    .takes_value(true),
            )
            .arg(
                Arg::new("dense")
                    .short('d')
                    .long("dense")
                    .required(false)
                    .long_help("Use the dense (base58) alphabet instead of safe (base32)")
                    .takes_value(false),
            )
            .arg(
                Arg::new("decode")
                    .short('x')
                    .long("decode")
                    .required(false)
                    .long_help("Decode a previously packed name instead of packing")
                    .takes_value(true),
            )
            .get_matches();

        CliOptions {
            zone: matches.value_of("zone").unwrap().to_string(),
            payload: matches.value_of("payload").unwrap().to_string(),
            dense: matches.is_present("dense"),
            decode: matches.value_of("decode").map(String::from),
        }
    }
}

fn main() -> TunnelResult<()> {
    env_logger::init();
    let options = CliOptions::options();
    let alphabet = if options.dense { Alphabet::Dense } else { Alphabet::Safe };
    debug!("zone={} dense={} decode={:?}", options.zone, options.dense, options.decode);

    let zone = ParentZone::new(&options.zone)?;

    if let Some(name) = options.decode {
        let subdata: String = name.trim_end_matches(zone.as_str()).split('.').collect();
        let bytes = Alphabet::Dense.decode(&subdata).or_else(|_| Alphabet::Safe.decode(&subdata))?;
        let frame = Frame::decode(&bytes)?;
        println!("{:?}", frame);
        return Ok(());
    }

    let frame = Frame::nop(0, options.payload.into_bytes());
    let encoded = alphabet.encode(&frame.encode());
    let name = zone.pack(&encoded)?;
    println!("{}", name);
    Ok(())
}
