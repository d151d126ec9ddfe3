use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use leasq_core::{
    Consumer, DocumentStore, LeasqConfig, QueueDocument, ReceivedMessage, RocksDbStore,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "leasq", about = "Lease-based queue consumer CLI")]
struct Cli {
    /// Configuration file (defaults to leasq.toml, then /etc/leasq/leasq.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// RocksDB data directory (overrides LEASQ_DATA_DIR and the config file)
    #[arg(long, global = true)]
    data_dir: Option<String>,

    /// Queue name
    #[arg(long, global = true)]
    queue: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Claim the next available message and print it
    Receive {
        /// Delete the message after printing it
        #[arg(long, conflicts_with = "nack")]
        ack: bool,

        /// Release the message for immediate redelivery after printing it
        #[arg(long)]
        nack: bool,
    },

    /// Delete a message
    Ack {
        /// Message id
        id: String,
    },

    /// Make a message claimable again right away
    Nack {
        /// Message id
        id: String,
    },

    /// Extend the lease of a message
    Renew {
        /// Message id
        id: String,
    },

    /// Check whether a message is still stored
    Exists {
        /// Message id
        id: String,
    },

    /// Print a message without claiming it
    Load {
        /// Message id
        id: String,
    },

    /// Insert a new message into the queue
    Send {
        /// Header as key=value (repeatable)
        #[arg(long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,

        /// Message body
        body: String,
    },
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got \"{raw}\"")),
    }
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("Error: {message}");
    process::exit(1);
}

fn load_config(explicit: Option<&Path>) -> LeasqConfig {
    if let Some(path) = explicit {
        return match LeasqConfig::load(path) {
            Ok(config) => {
                info!(path = %path.display(), "loaded configuration");
                config
            }
            Err(e) => fail(e),
        };
    }

    let paths = ["leasq.toml", "/etc/leasq/leasq.toml"];
    for path in &paths {
        if Path::new(path).exists() {
            match LeasqConfig::load(path) {
                Ok(config) => {
                    info!(path, "loaded configuration");
                    return config;
                }
                Err(e) => fail(e),
            }
        }
    }

    info!("no config file found, using defaults");
    LeasqConfig::default()
}

fn print_message(msg: &ReceivedMessage<'_>) {
    println!("id: {}", msg.id());
    println!("queue: {}", msg.queue_name());
    println!("delivery_count: {}", msg.delivery_count());
    let mut headers: Vec<_> = msg.headers().iter().collect();
    headers.sort();
    for (key, value) in headers {
        println!("header: {key}={value}");
    }
    println!("body: {}", String::from_utf8_lossy(msg.body()));
}

async fn cmd_receive(consumer: &Consumer, ack: bool, nack: bool) {
    match consumer.next_message().await {
        Ok(Some(msg)) => {
            print_message(&msg);
            if ack {
                if let Err(e) = msg.ack().await {
                    fail(e);
                }
                println!("acked");
            } else if nack {
                msg.nack().await;
                println!("nacked");
            }
        }
        Ok(None) => println!("no message available"),
        Err(e) => fail(e),
    }
}

async fn cmd_ack(consumer: &Consumer, id: String) {
    match consumer.ack(&id).await {
        Ok(()) => println!("Acked \"{id}\""),
        Err(e) => fail(e),
    }
}

async fn cmd_exists(consumer: &Consumer, id: String) {
    match consumer.exists(&id).await {
        Ok(found) => println!("{found}"),
        Err(e) => fail(e),
    }
}

async fn cmd_load(consumer: &Consumer, id: String) {
    match consumer.load(&id).await {
        Ok(Some(msg)) => print_message(&msg),
        Ok(None) => println!("not found"),
        Err(e) => fail(e),
    }
}

async fn cmd_send(
    store: &RocksDbStore,
    queue: &str,
    headers: Vec<(String, String)>,
    body: String,
) {
    let document = match QueueDocument::new(queue, headers, body.into_bytes()).to_document() {
        Ok(document) => document,
        Err(e) => fail(e),
    };
    match store.insert_one(document).await {
        Ok(id) => println!("{id}"),
        Err(e) => fail(e),
    }
}

#[tokio::main]
async fn main() {
    leasq_core::telemetry::init_tracing("warn");

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref());

    let data_dir = cli
        .data_dir
        .or_else(|| std::env::var("LEASQ_DATA_DIR").ok())
        .unwrap_or_else(|| config.storage.data_dir.clone());
    let Some(queue) = cli.queue else {
        fail("--queue is required");
    };

    let store = match RocksDbStore::open(&data_dir) {
        Ok(store) => Arc::new(store),
        Err(e) => fail(format!("cannot open store at {data_dir}: {e}")),
    };
    info!(%data_dir, %queue, "opened store");

    let consumer = match Consumer::new(config.consumer, queue.clone(), store.clone()) {
        Ok(consumer) => consumer,
        Err(e) => fail(e),
    };

    match cli.command {
        Commands::Receive { ack, nack } => cmd_receive(&consumer, ack, nack).await,
        Commands::Ack { id } => cmd_ack(&consumer, id).await,
        Commands::Nack { id } => {
            consumer.nack(&id).await;
            println!("Nacked \"{id}\"");
        }
        Commands::Renew { id } => {
            consumer.renew(&id).await;
            println!("Renewed \"{id}\"");
        }
        Commands::Exists { id } => cmd_exists(&consumer, id).await,
        Commands::Load { id } => cmd_load(&consumer, id).await,
        Commands::Send { headers, body } => cmd_send(&store, &queue, headers, body).await,
    }
}
