/// policy-bridge - replay recorded core sessions and inspect data filters
use policy_bridge::core::ScriptedCore;
use policy_bridge::{Bridge, BridgeConfig, Filter, Transcript};
use std::env;
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::process;
use std::sync::Arc;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_usage() {
    eprintln!("policy-bridge v{}", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    policy-bridge [OPTIONS] <COMMAND> <INPUT>");
    eprintln!();
    eprintln!("COMMANDS:");
    eprintln!("    replay <transcript.json>  Run a recorded event transcript and print bindings");
    eprintln!("    explain <filter.json>     Pretty-print a wire filter");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    -h, --help             Print this help message");
    eprintln!("    -v, --version          Print version information");
    eprintln!("    --log <LEVEL>          Log level: error, warn, info, debug, trace (default: warn)");
    eprintln!("    --config <FILE>        Bridge configuration (TOML)");
    eprintln!();
    eprintln!("EXAMPLES:");
    eprintln!("    policy-bridge replay session.json");
    eprintln!("    policy-bridge --log trace replay session.json");
    eprintln!("    cat filter.json | policy-bridge explain -");
}

fn print_version() {
    println!("policy-bridge {}", VERSION);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Replay,
    Explain,
}

struct Options {
    command: Command,
    input: String,
    log_level: tracing::Level,
    config: Option<String>,
}

fn parse_args() -> Result<Options, String> {
    let args: Vec<String> = env::args().collect();

    let mut command = None;
    let mut input = None;
    let mut log_level = tracing::Level::WARN;
    let mut config = None;
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage();
                process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                process::exit(0);
            }
            "--log" => {
                i += 1;
                let level = args.get(i).ok_or("Missing level after --log")?;
                log_level = level
                    .parse()
                    .map_err(|_| format!("Unknown log level: {}", level))?;
            }
            "--config" => {
                i += 1;
                config = Some(args.get(i).ok_or("Missing file after --config")?.clone());
            }
            arg if arg.starts_with('-') && arg != "-" => {
                return Err(format!("Unknown option: {}", arg));
            }
            "replay" if command.is_none() => command = Some(Command::Replay),
            "explain" if command.is_none() => command = Some(Command::Explain),
            arg if command.is_none() => return Err(format!("Unknown command: {}", arg)),
            arg => {
                if input.is_some() {
                    return Err("Multiple input files specified".to_string());
                }
                input = Some(arg.to_string());
            }
        }
        i += 1;
    }

    Ok(Options {
        command: command.ok_or("Missing command")?,
        input: input.ok_or("Missing input file")?,
        log_level,
        config,
    })
}

fn read_input(input: &str) -> Result<String, String> {
    if input == "-" {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .map_err(|e| format!("Failed to read from stdin: {}", e))?;
        Ok(buffer)
    } else {
        let path = Path::new(input);
        if !path.exists() {
            return Err(format!("Input file not found: {}", input));
        }
        fs::read_to_string(path).map_err(|e| format!("Failed to read file '{}': {}", input, e))
    }
}

fn load_config(path: Option<&str>) -> Result<BridgeConfig, String> {
    match path {
        Some(path) => BridgeConfig::load(Path::new(path)).map_err(|e| e.to_string()),
        None => Ok(BridgeConfig::from_env()),
    }
}

fn replay(content: &str, config: BridgeConfig) -> Result<String, String> {
    let transcript: Transcript =
        serde_json::from_str(content).map_err(|e| format!("Invalid transcript: {}", e))?;
    let sources: Vec<String> = transcript
        .queries
        .iter()
        .enumerate()
        .map(|(n, q)| q.source.clone().unwrap_or_else(|| format!("<query {}>", n + 1)))
        .collect();
    let bridge = Bridge::new(Arc::new(ScriptedCore::from_transcript(transcript)), config);

    let mut output = String::new();
    for source in sources {
        output.push_str(&format!("?= {}\n", source));
        let query = match bridge.query(&source) {
            Ok(query) => query,
            Err(e) => {
                output.push_str(&format!("  error: {}\n", e));
                continue;
            }
        };
        let mut found = false;
        for result in query {
            match result {
                Ok(bindings) if bindings.is_empty() => {
                    found = true;
                    output.push_str("  true\n");
                }
                Ok(bindings) => {
                    found = true;
                    let formatted: Vec<String> = bindings
                        .iter()
                        .map(|(var, value)| format!("{} = {}", var, value))
                        .collect();
                    output.push_str(&format!("  {}\n", formatted.join(", ")));
                }
                Err(e) => {
                    output.push_str(&format!("  error: {}\n", e));
                    found = true;
                    break;
                }
            }
        }
        if !found {
            output.push_str("  false\n");
        }
    }
    Ok(output)
}

fn explain(content: &str) -> Result<String, String> {
    let filter = Filter::decode_str(content).map_err(|e| e.to_string())?;
    Ok(filter.to_string())
}

fn main() {
    let options = match parse_args() {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_max_level(options.log_level)
        .init();

    let content = match read_input(&options.input) {
        Ok(content) => content,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let output = match options.command {
        Command::Replay => {
            load_config(options.config.as_deref()).and_then(|config| replay(&content, config))
        }
        Command::Explain => explain(&content),
    };

    match output {
        Ok(output) => print!("{}", output),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}
