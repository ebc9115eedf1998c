//! dlc: command-line client for a remote deep-learning inference server.
//!
//! Subcommands:
//! - models
//! - infer
//! - serve

use std::env;
use std::process;

use tracing::debug;

use dlc_core::{Config, Endpoint, ImageTile, OptionValue, TileShape};
use dlc_server::DemoServer;
use dlc_session::SessionCoordinator;

fn print_help() {
    eprintln!(
        r#"dlc - remote inference client

USAGE:
    dlc [-v] <COMMAND> [OPTIONS]

COMMANDS:
    models      List the models a server offers
    infer       Run one inference on a constant tile
    serve       Run the reference inference server

OPTIONS:
    -h, --help          Print this help message
    -V, --version       Print version
    -v, --verbose       Debug logging (overrides RUST_LOG)

Run `dlc <COMMAND> --help` for command options.
"#
    );
}

fn print_version() {
    println!("dlc {}", env!("CARGO_PKG_VERSION"));
}

fn fail(msg: impl std::fmt::Display) -> ! {
    eprintln!("{msg}");
    process::exit(1);
}

/// Value of the flag at `args[i]`, or exit with a message.
fn flag_value<'a>(args: &'a [String], i: usize) -> &'a str {
    match args.get(i + 1) {
        Some(v) => v.as_str(),
        None => fail(format!("Missing value for {}", args[i])),
    }
}

fn parse_num<T: std::str::FromStr>(flag: &str, v: &str) -> T {
    v.parse()
        .unwrap_or_else(|_| fail(format!("Invalid {flag} value: {v}")))
}

/// `--config` / `--endpoint`, shared by the client commands.
#[derive(Default)]
struct ClientArgs {
    config_path: Option<String>,
    endpoint: Option<String>,
}

impl ClientArgs {
    /// Consume the flag at `args[i]` if it is one of ours. Returns the next index.
    fn take(&mut self, args: &[String], i: usize) -> Option<usize> {
        match args[i].as_str() {
            "--config" => {
                self.config_path = Some(flag_value(args, i).to_string());
                Some(i + 2)
            }
            "--endpoint" => {
                self.endpoint = Some(flag_value(args, i).to_string());
                Some(i + 2)
            }
            _ => None,
        }
    }

    fn config(&self) -> Config {
        let mut cfg = match &self.config_path {
            Some(p) => Config::load(p).unwrap_or_else(|e| fail(format!("Failed to load config {p}: {e}"))),
            None => Config::default(),
        };
        if let Some(ep) = &self.endpoint {
            let ep = Endpoint::parse(ep).unwrap_or_else(|e| fail(format!("Invalid --endpoint: {e}")));
            cfg.server.host = ep.host().to_string();
            cfg.server.port = ep.port();
        }
        cfg
    }
}

fn connect(cfg: &Config, verbose: bool) -> SessionCoordinator {
    dlc_logging::init_tracing(&cfg.logging.filter, verbose);
    SessionCoordinator::from_config(cfg).unwrap_or_else(|e| fail(e))
}

fn cmd_models(args: &[String], verbose: bool) {
    let mut client = ClientArgs::default();
    let mut i = 0usize;
    while i < args.len() {
        if let Some(next) = client.take(args, i) {
            i = next;
            continue;
        }
        match args[i].as_str() {
            "--help" | "-h" => {
                println!(
                    r#"dlc models

USAGE:
    dlc models [--config PATH] [--endpoint HOST:PORT]

OPTIONS:
    --config PATH          YAML config (default: built-in defaults)
    --endpoint HOST:PORT   Server address (overrides the config)
"#
                );
                return;
            }
            other => {
                eprintln!("Unknown option for `dlc models`: {}", other);
                eprintln!("Run `dlc models --help` for usage.");
                process::exit(1);
            }
        }
    }

    let cfg = client.config();
    let coord = connect(&cfg, verbose);
    let catalog = coord.list_models().unwrap_or_else(|e| fail(e));

    println!("Server {} offers {} model(s):", coord.endpoint(), catalog.len());
    for (idx, m) in catalog.models.iter().enumerate() {
        println!(
            "  [{idx}] {}  inputs={} ({})",
            m.name,
            m.num_inputs(),
            m.input_names.join(", ")
        );
        for f in &m.option_schema {
            println!("        {:<6} {} = {}", f.kind(), f.name, f.default);
        }
    }
    coord.close();
}

fn cmd_infer(args: &[String], verbose: bool) {
    let mut client = ClientArgs::default();
    let mut model: Option<String> = None;
    let mut sets: Vec<(String, String)> = Vec::new();
    let mut width: u32 = 8;
    let mut height: u32 = 8;
    let mut channels: u32 = 3;
    let mut value: f32 = 0.5;

    let mut i = 0usize;
    while i < args.len() {
        if let Some(next) = client.take(args, i) {
            i = next;
            continue;
        }
        match args[i].as_str() {
            "--help" | "-h" => {
                println!(
                    r#"dlc infer

USAGE:
    dlc infer --model N [--set NAME=VALUE]... [--width W] [--height H] [--channels C]
              [--value V] [--config PATH] [--endpoint HOST:PORT]

OPTIONS:
    --model N              Model index (or name) from `dlc models`
    --set NAME=VALUE       Set a model option; may be repeated
    --width W              Tile width (default: 8)
    --height H             Tile height (default: 8)
    --channels C           Tile channels (default: 3)
    --value V              Constant sample value of every input (default: 0.5)
    --config PATH          YAML config (default: built-in defaults)
    --endpoint HOST:PORT   Server address (overrides the config)
"#
                );
                return;
            }
            "--model" => {
                model = Some(flag_value(args, i).to_string());
                i += 2;
            }
            "--set" => {
                let kv = flag_value(args, i);
                let (k, v) = kv
                    .split_once('=')
                    .unwrap_or_else(|| fail(format!("Invalid --set value (expected NAME=VALUE): {kv}")));
                sets.push((k.to_string(), v.to_string()));
                i += 2;
            }
            "--width" => {
                width = parse_num("--width", flag_value(args, i));
                i += 2;
            }
            "--height" => {
                height = parse_num("--height", flag_value(args, i));
                i += 2;
            }
            "--channels" => {
                channels = parse_num("--channels", flag_value(args, i));
                i += 2;
            }
            "--value" => {
                value = parse_num("--value", flag_value(args, i));
                i += 2;
            }
            other => {
                eprintln!("Unknown option for `dlc infer`: {}", other);
                eprintln!("Run `dlc infer --help` for usage.");
                process::exit(1);
            }
        }
    }
    let Some(model) = model else {
        fail("Missing --model (run `dlc models` to list them)");
    };

    let cfg = client.config();
    let coord = connect(&cfg, verbose);
    let catalog = coord.list_models().unwrap_or_else(|e| fail(e));
    let index = match model.parse::<usize>() {
        Ok(n) => n,
        Err(_) => catalog
            .position(&model)
            .unwrap_or_else(|| fail(format!("Unknown model: {model}"))),
    };
    let descriptor = coord.select_model(index).unwrap_or_else(|e| fail(e));

    for (name, raw) in &sets {
        let kind = coord
            .option_kind(name)
            .unwrap_or_else(|| fail(format!("Model {} has no option {name}", descriptor.name)));
        let v = OptionValue::parse_as(kind, raw)
            .unwrap_or_else(|| fail(format!("Invalid {kind} value for {name}: {raw}")));
        coord.set_option(name, v);
    }
    for (kind, name) in coord.option_fields() {
        if let Ok(v) = coord.get_option(kind, &name) {
            debug!(%kind, %name, value = %v, "option");
        }
    }

    let shape = TileShape::new(width, height, channels);
    let tile = ImageTile::filled(shape, value).unwrap_or_else(|e| fail(e));
    let inputs = vec![tile; descriptor.num_inputs()];
    let out = coord.run_inference(&inputs, None).unwrap_or_else(|e| fail(e));

    let checksum: f64 = out.pixels().iter().map(|&v| f64::from(v)).sum();
    let stats = coord.stats_snapshot();
    let lat = &stats.inference_latency;
    println!("Model: {} (index {index})", descriptor.name);
    println!("Inputs: {} x {shape}", inputs.len());
    println!("Output: {}", out.shape());
    println!("Checksum: {checksum:.6}");
    println!(
        "Exchanges: sent={} received={} errors={}  latency_us p50={} p95={} max={}",
        stats.sent, stats.received, stats.errors, lat.p50_us, lat.p95_us, lat.max_us
    );
    coord.close();
}

fn cmd_serve(args: &[String], verbose: bool) {
    let mut bind = "127.0.0.1:55555".to_string();
    let mut filter = "info".to_string();

    let mut i = 0usize;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                println!(
                    r#"dlc serve

USAGE:
    dlc serve [--bind ADDR] [--log-filter FILTER]

OPTIONS:
    --bind ADDR            Listen address (default: 127.0.0.1:55555)
    --log-filter FILTER    tracing filter when RUST_LOG is unset (default: info)

Built-in models: edge-detect, invert, blend, gain.
"#
                );
                return;
            }
            "--bind" => {
                bind = flag_value(args, i).to_string();
                i += 2;
            }
            "--log-filter" => {
                filter = flag_value(args, i).to_string();
                i += 2;
            }
            other => {
                eprintln!("Unknown option for `dlc serve`: {}", other);
                eprintln!("Run `dlc serve --help` for usage.");
                process::exit(1);
            }
        }
    }

    dlc_logging::init_tracing(&filter, verbose);
    let server = DemoServer::bind(bind.as_str()).unwrap_or_else(|e| fail(e));
    match server.local_addr() {
        Ok(addr) => println!("Serving {} model(s) on {addr}", server.models().len()),
        Err(e) => fail(e),
    }
    if let Err(e) = server.serve() {
        fail(e);
    }
}

fn main() {
    let mut args: Vec<String> = env::args().skip(1).collect();
    let before = args.len();
    args.retain(|a| a != "-v" && a != "--verbose");
    let verbose = args.len() != before;

    if args.is_empty() {
        print_help();
        process::exit(0);
    }

    match args[0].as_str() {
        "-h" | "--help" | "help" => {
            print_help();
        }
        "-V" | "--version" => {
            print_version();
        }
        "models" => {
            cmd_models(&args[1..], verbose);
        }
        "infer" => {
            cmd_infer(&args[1..], verbose);
        }
        "serve" => {
            cmd_serve(&args[1..], verbose);
        }
        cmd => {
            eprintln!("Unknown command: {}", cmd);
            eprintln!("Run `dlc --help` for usage.");
            process::exit(1);
        }
    }
}
