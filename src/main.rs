use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use ai_gateway::{Config, GatewayClient, Response, ResponseStatus, Schema};
use tracing_subscriber::EnvFilter;

const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const RESET: &str = "\x1b[0m";

#[derive(Debug, Default)]
struct AskArgs {
    prompt: Option<String>,
    system: Option<String>,
    schema: Option<PathBuf>,
    list: bool,
    namespace: Option<String>,
    config: Option<PathBuf>,
    debug: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("ask") => run_ask_command(&args[2..]).await,
        Some("config") => run_config_command(&args[2..]),
        Some("-V" | "--version" | "version") => {
            println!("ai-gateway {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        Some("-h" | "--help" | "help") | None => {
            print_help();
            ExitCode::SUCCESS
        }
        Some(other) => {
            eprintln!("{RED}error:{RESET} unknown command '{other}'");
            eprintln!("Run 'ai-gateway help' for usage");
            ExitCode::FAILURE
        }
    }
}

fn parse_ask_args(args: &[String]) -> Result<AskArgs, String> {
    let mut parsed = AskArgs::default();
    let mut i = 0;

    let value = |i: &mut usize, flag: &str| -> Result<String, String> {
        *i += 1;
        args.get(*i)
            .cloned()
            .ok_or_else(|| format!("{flag} requires a value"))
    };

    while i < args.len() {
        match args[i].as_str() {
            "--system" | "-s" => parsed.system = Some(value(&mut i, "--system")?),
            "--schema" => parsed.schema = Some(PathBuf::from(value(&mut i, "--schema")?)),
            "--namespace" | "-n" => parsed.namespace = Some(value(&mut i, "--namespace")?),
            "--config" | "-c" => parsed.config = Some(PathBuf::from(value(&mut i, "--config")?)),
            "--list" | "-l" => parsed.list = true,
            "--debug" | "-d" => parsed.debug = true,
            flag if flag.starts_with('-') => return Err(format!("unknown option '{flag}'")),
            text => match &mut parsed.prompt {
                Some(prompt) => {
                    prompt.push(' ');
                    prompt.push_str(text);
                }
                None => parsed.prompt = Some(text.to_string()),
            },
        }
        i += 1;
    }

    Ok(parsed)
}

fn load_config(path: Option<&PathBuf>, debug: bool) -> Result<Config, String> {
    let config = match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .map_err(|e| e.to_string())?;

    Ok(config.with_overrides(
        env::var("AI_GATEWAY_MODEL").ok(),
        env::var("AI_GATEWAY_ENDPOINT").ok(),
        env::var("AI_GATEWAY_API_KEY").ok(),
        debug,
    ))
}

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("ai_gateway=debug,warn"))
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("ai_gateway=info,warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

async fn run_ask_command(args: &[String]) -> ExitCode {
    let ask = match parse_ask_args(args) {
        Ok(ask) => ask,
        Err(e) => {
            eprintln!("{RED}error:{RESET} {e}");
            return ExitCode::FAILURE;
        }
    };
    let Some(prompt) = ask.prompt.clone() else {
        eprintln!("{RED}error:{RESET} missing prompt");
        eprintln!("Usage: ai-gateway ask <prompt> [options]");
        return ExitCode::FAILURE;
    };

    let config = match load_config(ask.config.as_ref(), ask.debug) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{RED}error:{RESET} {e}");
            return ExitCode::FAILURE;
        }
    };
    init_logging(config.logging.debug);

    let gateway = GatewayClient::new(&config);
    let mut builder = gateway.request(prompt);
    if let Some(system) = ask.system {
        builder = builder.system(system);
    }
    if let Some(namespace) = ask.namespace {
        builder = builder.namespace(namespace);
    }
    if let Some(path) = &ask.schema {
        let schema = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read schema {}: {e}", path.display()))
            .and_then(|text| {
                let name = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "schema".to_string());
                Schema::from_json_str(name, &text).map_err(|e| e.to_string())
            });
        match schema {
            Ok(schema) => builder = builder.schema(schema),
            Err(e) => {
                eprintln!("{RED}error:{RESET} {e}");
                return ExitCode::FAILURE;
            }
        }
    }
    if ask.list {
        builder = builder.list();
    }

    let response = gateway.generate(builder.build()).await;
    print_response(&response)
}

fn print_response(response: &Response) -> ExitCode {
    if let Some(error) = &response.error {
        eprintln!("{RED}error:{RESET} {error}");
        if let Some(suggestion) = error.suggestion() {
            eprintln!("{DIM}{suggestion}{RESET}");
        }
        if !response.raw_text.is_empty() {
            eprintln!("{DIM}raw output:{RESET}\n{}", response.raw_text);
        }
        return ExitCode::FAILURE;
    }

    match &response.parsed_value {
        Some(value) => match serde_json::to_string_pretty(value) {
            Ok(pretty) => println!("{pretty}"),
            Err(_) => println!("{value}"),
        },
        None => println!("{}", response.raw_text),
    }

    if response.status == ResponseStatus::PartialSuccess {
        eprintln!(
            "{YELLOW}warning:{RESET} {} invalid item(s) skipped",
            response.skipped_count
        );
    }
    ExitCode::SUCCESS
}

fn run_config_command(args: &[String]) -> ExitCode {
    let path = match args {
        [flag, path, ..] if flag == "--config" || flag == "-c" => Some(PathBuf::from(path)),
        _ => None,
    };

    match load_config(path.as_ref(), false) {
        Ok(mut config) => {
            if config.provider.api_key.is_some() {
                config.provider.api_key = Some("<redacted>".to_string());
            }
            match config.to_toml() {
                Ok(text) => {
                    let source = path.unwrap_or_else(Config::path);
                    println!("{DIM}# {}{RESET}", source.display());
                    print!("{text}");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("{RED}error:{RESET} {e}");
                    ExitCode::FAILURE
                }
            }
        }
        Err(e) => {
            eprintln!("{RED}error:{RESET} {e}");
            ExitCode::FAILURE
        }
    }
}

fn print_help() {
    println!(
        r#"{BOLD}ai-gateway{RESET} {version}
Quota-aware, caching gateway to a generative-AI provider

{BOLD}USAGE:{RESET}
    ai-gateway <command> [options]

{BOLD}COMMANDS:{RESET}
    ask <prompt>        Send a prompt through the gateway
    config              Print the effective configuration
    help                Show this message
    version             Show version

{BOLD}ASK OPTIONS:{RESET}
    -s, --system <text>     System instructions
        --schema <file>     JSON Schema the answer must match
    -l, --list              Expect a list; invalid items are skipped
    -n, --namespace <name>  Cache namespace (default: "default")
    -c, --config <file>     Config file (default: {config})
    -d, --debug             Verbose logging

{BOLD}ENVIRONMENT:{RESET}
    AI_GATEWAY_API_KEY      Provider API key
    AI_GATEWAY_MODEL        Model name override
    AI_GATEWAY_ENDPOINT     Chat completions endpoint override
    RUST_LOG                Log filter (overrides --debug)
"#,
        version = env!("CARGO_PKG_VERSION"),
        config = Config::path().display(),
    );
}
