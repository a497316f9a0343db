use hostmux_frame::PROTOCOL_VERSION;
use hostmux_transport::DEFAULT_SUBPROTOCOL;

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("hostmux {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: hostmux");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("HOSTMUX_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("protocol: {DEFAULT_SUBPROTOCOL} (version {PROTOCOL_VERSION})");
    println!("features: cli=true");

    Ok(SUCCESS)
}
