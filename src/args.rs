use std::time::Duration;

pub const DEFAULT_ADDRESS: &str = "127.0.0.1:5555";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    Info,
    Shell(String),
    Ls(String),
    Stat(String),
    Push { local: String, remote: String },
    Pull { remote: String, local: String },
    Reboot(String),
}

#[derive(Debug, PartialEq, Eq)]
pub struct Args {
    pub address: String,
    pub timeout: Option<Duration>,
    pub json: bool,
    pub debug_mode: bool,
    pub command: CliCommand,
}

impl Args {
    /// Parses everything after the program name. `Ok(None)` means help or
    /// version was printed and there is nothing left to do.
    pub fn parse_from(args: impl IntoIterator<Item = String>) -> Result<Option<Self>, String> {
        let mut address = DEFAULT_ADDRESS.to_string();
        let mut timeout = None;
        let mut json = false;
        let mut debug_mode = false;
        let mut words: Vec<String> = Vec::new();

        for arg in args {
            if !words.is_empty() {
                // Everything after the command word belongs to the command
                words.push(arg);
            } else if arg == "--help" || arg == "-h" {
                print_help();
                return Ok(None);
            } else if arg == "--version" || arg == "-v" {
                println!(
                    "Android USB Link v{} (built {})",
                    env!("APP_VERSION_DISPLAY"),
                    env!("APP_BUILD_YEAR")
                );
                return Ok(None);
            } else if arg == "--json" {
                json = true;
            } else if arg == "--debug" {
                debug_mode = true;
            } else if let Some(value) = arg.strip_prefix("--connect=") {
                if value.is_empty() {
                    return Err("--connect needs HOST:PORT".to_string());
                }
                address = value.to_string();
            } else if let Some(value) = arg.strip_prefix("--timeout=") {
                let secs = value
                    .parse::<u64>()
                    .map_err(|_| format!("Invalid timeout value: {value}"))?;
                timeout = Some(Duration::from_secs(secs));
            } else if arg.starts_with('-') {
                return Err(format!("Unknown argument: {arg}"));
            } else {
                words.push(arg);
            }
        }

        let command = parse_command(&words)?;
        Ok(Some(Args {
            address,
            timeout,
            json,
            debug_mode,
            command,
        }))
    }
}

fn parse_command(words: &[String]) -> Result<CliCommand, String> {
    let Some((name, rest)) = words.split_first() else {
        return Err("No command given".to_string());
    };
    let exactly = |count: usize| -> Result<(), String> {
        if rest.len() == count {
            Ok(())
        } else {
            Err(format!("'{name}' takes {count} argument(s), got {}", rest.len()))
        }
    };
    match name.as_str() {
        "info" => {
            exactly(0)?;
            Ok(CliCommand::Info)
        }
        "shell" => {
            if rest.is_empty() {
                return Err("'shell' needs a command".to_string());
            }
            Ok(CliCommand::Shell(rest.join(" ")))
        }
        "ls" => {
            exactly(1)?;
            Ok(CliCommand::Ls(rest[0].clone()))
        }
        "stat" => {
            exactly(1)?;
            Ok(CliCommand::Stat(rest[0].clone()))
        }
        "push" => {
            exactly(2)?;
            Ok(CliCommand::Push {
                local: rest[0].clone(),
                remote: rest[1].clone(),
            })
        }
        "pull" => {
            exactly(2)?;
            Ok(CliCommand::Pull {
                remote: rest[0].clone(),
                local: rest[1].clone(),
            })
        }
        "reboot" => match rest {
            [] => Ok(CliCommand::Reboot(String::new())),
            [target] => Ok(CliCommand::Reboot(target.clone())),
            _ => Err("'reboot' takes at most one target".to_string()),
        },
        other => Err(format!("Unknown command: {other}")),
    }
}

pub fn print_help() {
    println!("🤖 Android USB Link - ADB over TCP/IP without an adb server");
    println!();
    println!("USAGE:");
    println!("    android-usb-link [FLAGS] <COMMAND>");
    println!();
    println!("FLAGS:");
    println!("    --connect=HOST:PORT Device to talk to (default: {DEFAULT_ADDRESS})");
    println!("    --timeout=N         Per-operation timeout in seconds");
    println!("    --json              Print results as JSON");
    println!("    --debug             Log protocol traffic");
    println!("    --help, -h          Show this help message");
    println!("    --version, -v       Show version information");
    println!();
    println!("COMMANDS:");
    println!("    info                    Show device identity and properties");
    println!("    shell <cmd...>          Run a shell command");
    println!("    ls <path>               List a directory");
    println!("    stat <path>             Show file metadata");
    println!("    push <local> <remote>   Copy a file to the device");
    println!("    pull <remote> <local>   Copy a file from the device");
    println!("    reboot [target]         Reboot (optionally into bootloader/recovery)");
    println!();
    println!("EXAMPLES:");
    println!("    android-usb-link --connect=192.168.1.20:5555 info");
    println!("    android-usb-link shell getprop ro.product.model");
    println!("    android-usb-link --json ls /sdcard");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Option<Args>, String> {
        Args::parse_from(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_flags_and_command() {
        let args = parse(&["--connect=10.0.0.5:5555", "--json", "--timeout=3", "ls", "/sdcard"])
            .unwrap()
            .unwrap();

        assert_eq!(args.address, "10.0.0.5:5555");
        assert!(args.json);
        assert_eq!(args.timeout, Some(Duration::from_secs(3)));
        assert_eq!(args.command, CliCommand::Ls("/sdcard".to_string()));
    }

    #[test]
    fn test_shell_keeps_dashed_arguments() {
        let args = parse(&["shell", "ls", "-la", "/data"]).unwrap().unwrap();

        assert_eq!(args.address, DEFAULT_ADDRESS);
        assert_eq!(args.command, CliCommand::Shell("ls -la /data".to_string()));
    }

    #[test]
    fn test_reboot_target_is_optional() {
        let plain = parse(&["reboot"]).unwrap().unwrap();
        let bootloader = parse(&["reboot", "bootloader"]).unwrap().unwrap();

        assert_eq!(plain.command, CliCommand::Reboot(String::new()));
        assert_eq!(bootloader.command, CliCommand::Reboot("bootloader".to_string()));
    }

    #[test]
    fn test_errors() {
        assert!(parse(&[]).is_err(), "Command is required");
        assert!(parse(&["--timeout=soon", "info"]).is_err());
        assert!(parse(&["--frobnicate", "info"]).is_err());
        assert!(parse(&["push", "only-one"]).is_err());
        assert!(parse(&["dance"]).is_err());
    }
}
