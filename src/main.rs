mod args;

use android_usb_link::adb::{AdbDevice, AdbError, AdbResult};
use android_usb_link::config::AdbConfig;
use android_usb_link::transport::TcpTransport;
use args::{Args, CliCommand};
use serde::Serialize;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

fn main() -> ExitCode {
    let args = match Args::parse_from(std::env::args().skip(1)) {
        Ok(Some(args)) => args,
        Ok(None) => return ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("❌ {e}");
            args::print_help();
            return ExitCode::FAILURE;
        }
    };

    let mut logger = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if args.debug_mode {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(AdbError::DeviceAuth { description }) => {
            eprintln!("🔒 Device wants authentication and no key is available: {description}");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("❌ {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> AdbResult<()> {
    let mut config = AdbConfig::from_env();
    if let Some(timeout) = args.timeout {
        config.timeout = timeout;
    }

    if !args.json {
        println!("🔌 Connecting to {}...", args.address);
    }
    let transport = TcpTransport::connect(&args.address, config.timeout)?;
    let mut device = AdbDevice::connect(Arc::new(transport), &[], config)?;

    match &args.command {
        CliCommand::Info => {
            if args.json {
                print_json(device.info());
            } else {
                let info = device.info();
                println!("📱 {} '{}' (protocol {:#x}, max payload {} bytes)", info.systemtype, info.serial, info.version, info.max_data);
                for (key, value) in info.properties() {
                    println!("    {key} = {value}");
                }
            }
        }
        CliCommand::Shell(command) => {
            let output = device.shell(command, args.timeout)?;
            print!("{output}");
        }
        CliCommand::Ls(path) => {
            let entries = device.list(path)?;
            if args.json {
                print_json(&entries);
            } else {
                for entry in entries {
                    let kind = if entry.is_dir() { "d" } else { "-" };
                    println!("{kind}{:04o} {:>10} {}", entry.permissions(), entry.size, entry.filename);
                }
            }
        }
        CliCommand::Stat(path) => {
            let stat = device.stat(path)?;
            if args.json {
                print_json(&stat);
            } else if !stat.exists() {
                println!("❌ {path}: not found");
            } else {
                println!("📄 {path}: mode {:o}, {} bytes, mtime {}", stat.mode, stat.size, stat.mtime);
            }
        }
        CliCommand::Push { local, remote } => {
            device.push_file(Path::new(local), remote)?;
            println!("✅ Pushed {local} -> {remote}");
        }
        CliCommand::Pull { remote, local } => {
            let size = device.pull_file(remote, Path::new(local))?;
            println!("✅ Pulled {remote} -> {local} ({size} bytes)");
        }
        CliCommand::Reboot(target) => {
            device.reboot(target)?;
            let into = if target.is_empty() { "system" } else { target.as_str() };
            println!("🔄 Rebooting into {into}");
        }
    }

    device.close();
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("❌ Could not encode result as JSON: {e}"),
    }
}
