//! acqbus CLI Client
//!
//! Console client for watching bus traffic and sending one-shot
//! messages.

use clap::{Parser, Subcommand, ValueEnum};

use acqbus::{BusClient, PersistenceLevel, Value};

/// acqbus console client
#[derive(Parser, Debug)]
#[command(name = "acqbus-cli")]
#[command(about = "Console client for the acquisition bus")]
struct Args {
    /// Broker socket path
    #[arg(short, long, default_value = "/tmp/acqbus.sock")]
    socket: String,

    /// Source identity to declare at handshake
    #[arg(long, default_value = "console")]
    source: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect and print every broadcast frame
    Watch {
        /// Suppress this client's own messages
        #[arg(long)]
        no_echo: bool,
    },

    /// Send one message and exit
    Send {
        /// Persistence level
        #[arg(short, long, value_enum, default_value = "data")]
        level: Level,

        /// Record name
        record: String,

        /// Value literal: null, true/false, an integer, a float, or a string
        value: String,
    },

    /// Erase a persistent record published under this source
    Erase {
        /// Record name
        record: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Level {
    Data,
    State,
    Source,
    System,
}

impl From<Level> for PersistenceLevel {
    fn from(level: Level) -> Self {
        match level {
            Level::Data => PersistenceLevel::Data,
            Level::State => PersistenceLevel::State,
            Level::Source => PersistenceLevel::Source,
            Level::System => PersistenceLevel::System,
        }
    }
}

fn main() {
    let args = Args::parse();

    let result = match &args.command {
        Commands::Watch { no_echo } => {
            let client = connect(&args, *no_echo);
            watch(&client)
        }
        Commands::Send {
            level,
            record,
            value,
        } => {
            let mut client = connect(&args, false);
            client.send_at((*level).into(), record, parse_value(value))
        }
        Commands::Erase { record } => {
            let mut client = connect(&args, false);
            client.erase(record)
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn connect(args: &Args, no_echo: bool) -> BusClient {
    match BusClient::connect(&args.socket, &args.source, no_echo) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Failed to connect to {}: {}", args.socket, e);
            std::process::exit(1);
        }
    }
}

fn watch(client: &BusClient) -> acqbus::Result<()> {
    loop {
        let message = client.recv()?;
        println!(
            "{} {} = {:?}",
            message.source, message.record, message.value
        );
    }
}

/// Parse a small value literal: null, booleans, integers, floats,
/// optionally-quoted strings
fn parse_value(text: &str) -> Value {
    match text {
        "null" => return Value::Null,
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(i) = text.parse::<i64>() {
        return Value::Int(i);
    }
    if let Ok(f) = text.parse::<f64>() {
        return Value::Float(f);
    }
    let trimmed = text
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(text);
    Value::Str(trimmed.to_string())
}
