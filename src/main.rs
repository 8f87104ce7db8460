//! TTCP - command-line tool for the TTCP chat protocol
//!
//! Listens for and inspects packets, sends single packets to a server and
//! encodes/decodes packet files.

use std::fs::OpenOptions;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ttcp::config::{self, Config};
use ttcp::network::{self, Listener, ListenerEvent};
use ttcp::protocol::{
    self, Encoder, FileAttachment, FileDirectMessage, Packet, PacketReader, PacketWriter, Payload,
    TerminationType, TextDirectMessage,
};

/// TTCP - chat protocol codec and inspection tool
#[derive(Parser)]
#[command(name = "ttcp")]
#[command(author = "TTCP Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Encode, decode, send and inspect TTCP packets", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept connections and print every packet received
    Listen {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Connect to a server and send one packet
    Send {
        /// Server host
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Server port
        #[arg(short, long)]
        port: Option<u16>,

        /// Wait for one packet in reply
        #[arg(long)]
        await_reply: bool,

        #[command(subcommand)]
        packet: PacketArgs,
    },

    /// Append one encoded packet to a file
    Encode {
        /// File to append to
        #[arg(short, long)]
        output: PathBuf,

        #[command(subcommand)]
        packet: PacketArgs,
    },

    /// Decode and print every packet in a file
    Dump {
        /// File holding a packet stream
        path: PathBuf,

        /// Print packets as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Packet to build from the command line
#[derive(Subcommand, Debug, Clone)]
enum PacketArgs {
    /// Broadcast text message
    Text { text: String },

    /// Direct text message
    Dm {
        #[arg(long)]
        to: u32,
        #[arg(long)]
        from: u32,
        text: String,
    },

    /// Broadcast file message
    File {
        path: PathBuf,
        #[arg(long, default_value = "application/octet-stream")]
        mime: String,
        #[arg(long, default_value = "")]
        description: String,
    },

    /// Direct file message
    FileDm {
        #[arg(long)]
        to: u32,
        #[arg(long)]
        from: u32,
        path: PathBuf,
        #[arg(long, default_value = "application/octet-stream")]
        mime: String,
        #[arg(long, default_value = "")]
        description: String,
    },

    /// Connection request (defaults to the configured name)
    Connect { name: Option<String> },

    /// Reclaim a previously assigned id
    Reclaim { id: u32 },

    /// Rename request
    Rename { name: String },

    /// Terminate the session, keeping the account
    Logout,

    /// Terminate the session and delete the account
    Delete,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };

    // Initialize logging
    let filter = if cli.verbose || config.general.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Listen { port } => {
            run_listener(config, port).await?;
        }
        Commands::Send {
            host,
            port,
            await_reply,
            packet,
        } => {
            let packet = build_packet(&packet, &config)?;
            run_send(&config, &host, port, await_reply, packet).await?;
        }
        Commands::Encode { output, packet } => {
            let packet = build_packet(&packet, &config)?;
            let written = encode_to_file(&config, &output, &packet)?;
            println!(
                "Appended {:?} ({} bytes) to {}",
                packet.packet_type(),
                written,
                output.display()
            );
        }
        Commands::Dump { path, json } => {
            dump_file(&config, &path, json)?;
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config()?;
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}

/// Turn command-line packet arguments into a packet
fn build_packet(args: &PacketArgs, config: &Config) -> anyhow::Result<Packet> {
    let payload = match args {
        PacketArgs::Text { text } => Payload::TextMessage { text: text.clone() },
        PacketArgs::Dm { to, from, text } => Payload::TextDirectMessage(TextDirectMessage {
            recipient_id: *to,
            sender_id: *from,
            text: text.clone(),
        }),
        PacketArgs::File {
            path,
            mime,
            description,
        } => Payload::FileMessage(read_attachment(path, mime, description)?),
        PacketArgs::FileDm {
            to,
            from,
            path,
            mime,
            description,
        } => Payload::FileDirectMessage(FileDirectMessage {
            recipient_id: *to,
            sender_id: *from,
            file: read_attachment(path, mime, description)?,
        }),
        PacketArgs::Connect { name } => Payload::ConnectionRequest {
            name: name.clone().unwrap_or_else(|| config.general.name.clone()),
        },
        PacketArgs::Reclaim { id } => Payload::IdReclaim { id: *id },
        PacketArgs::Rename { name } => Payload::RenameRequest { name: name.clone() },
        PacketArgs::Logout => Payload::ConnectionTermination {
            kind: TerminationType::Logout,
        },
        PacketArgs::Delete => Payload::ConnectionTermination {
            kind: TerminationType::Delete,
        },
    };

    Ok(Packet::new(payload))
}

fn read_attachment(path: &Path, mime: &str, description: &str) -> anyhow::Result<FileAttachment> {
    let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    Ok(FileAttachment {
        mime_type: mime.to_string(),
        file_name,
        description: description.to_string(),
        data,
    })
}

/// One-line summary of a packet, without dumping file contents
fn describe(packet: &Packet) -> String {
    let detail = match &packet.payload {
        Payload::Error { code, description } => format!("{}: {}", code, description),
        Payload::ConnectionRequest { name } | Payload::RenameRequest { name } => {
            format!("name={:?}", name)
        }
        Payload::IdReclaim { id } | Payload::ClientLogout { id } => format!("id={}", id),
        Payload::ConnectionResponse { accepted, .. } => format!(
            "accepted={} name={:?}",
            accepted,
            packet.payload.response_name()
        ),
        Payload::ServerConnectionResponse { id, users } => {
            format!("id={} users={:?}", id, users)
        }
        Payload::ConnectionTermination { kind } => format!("{:?}", kind),
        Payload::ClientUpdate { id, name } => format!("id={} name={:?}", id, name),
        Payload::TextMessage { text } => format!("{:?}", text),
        Payload::FileMessage(file) => format!(
            "{} ({}, {} bytes) {:?}",
            file.file_name,
            file.mime_type,
            file.data.len(),
            file.description
        ),
        Payload::TextDirectMessage(dm) => {
            format!("{} -> {}: {:?}", dm.sender_id, dm.recipient_id, dm.text)
        }
        Payload::FileDirectMessage(dm) => format!(
            "{} -> {}: {} ({}, {} bytes)",
            dm.sender_id,
            dm.recipient_id,
            dm.file.file_name,
            dm.file.mime_type,
            dm.file.data.len()
        ),
    };

    format!(
        "[{}] {:?} ({} bytes) {}",
        packet.timestamp,
        packet.packet_type(),
        packet.encoded_len(),
        detail
    )
}

/// Run the inspection listener
async fn run_listener(config: Config, port: Option<u16>) -> anyhow::Result<()> {
    let mut net_config = config.network.clone();
    if let Some(port) = port {
        net_config.port = port;
    }

    let mut listener = Listener::new(net_config).with_max_packet_size(config.codec.max_packet_size);
    let mut event_rx = listener
        .take_event_receiver()
        .context("event receiver already taken")?;

    let bind_addr = listener.start().await?;

    println!("\n========================================");
    println!("  TTCP Listener Running");
    println!("========================================");
    println!("  Address: {}", bind_addr);
    println!("  Protocol version: {}", protocol::PROTOCOL_VERSION);
    println!("========================================");
    println!("\nPress Ctrl+C to stop.\n");

    // Main event loop
    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                match event {
                    ListenerEvent::PeerConnected { addr } => {
                        println!("+ Peer connected: {}", addr);
                    }
                    ListenerEvent::PacketReceived { addr, packet } => {
                        println!("{} {}", addr, describe(&packet));
                    }
                    ListenerEvent::DecodeFailed { addr, error, recoverable } => {
                        tracing::warn!("Decode failure from {} (recoverable: {}): {}", addr, recoverable, error);
                    }
                    ListenerEvent::PeerDisconnected { addr, reason } => {
                        println!("- Peer disconnected: {} ({})", addr, reason);
                    }
                    ListenerEvent::Started { .. } | ListenerEvent::Stopped => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    listener.stop().await?;
    tracing::info!("Listener stopped");

    Ok(())
}

/// Connect, send one packet and optionally print the reply
async fn run_send(
    config: &Config,
    host: &str,
    port: Option<u16>,
    await_reply: bool,
    packet: Packet,
) -> anyhow::Result<()> {
    let port = port.unwrap_or(config.network.port);
    let timeout = Duration::from_millis(config.network.connect_timeout_ms);

    let mut conn = network::connect(host, port, timeout)
        .await?
        .with_max_packet_size(config.codec.max_packet_size);

    conn.send(&packet).await?;
    println!("Sent {}", describe(&packet));

    if await_reply {
        let reply_timeout = Duration::from_millis(config.network.read_timeout_ms);
        match conn.recv_timeout(reply_timeout).await? {
            Some(reply) => println!("Received {}", describe(&reply)),
            None => println!("Server closed the connection"),
        }
    }

    Ok(())
}

/// Append one encoded packet to `path`
fn encode_to_file(config: &Config, path: &Path, packet: &Packet) -> anyhow::Result<usize> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening {}", path.display()))?;

    let encoder = Encoder::with_max_packet_size(config.codec.max_packet_size);
    let mut writer = PacketWriter::with_encoder(file, encoder);
    Ok(writer.write_packet(packet)?)
}

/// Decode every packet in `path` and print it
fn dump_file(config: &Config, path: &Path, json: bool) -> anyhow::Result<()> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let mut reader = PacketReader::with_max_packet_size(Cursor::new(bytes), config.codec.max_packet_size);

    let mut count = 0usize;
    while reader.available() {
        match reader.read_packet() {
            Ok(packet) => {
                if json {
                    println!("{}", serde_json::to_string(&packet)?);
                } else {
                    println!("{}", describe(&packet));
                }
                count += 1;
            }
            Err(e) if e.is_recoverable() => {
                tracing::warn!("Skipping packet at offset {}: {}", reader.get_ref().position(), e);
            }
            Err(e) => {
                return Err(e).context(format!(
                    "decoding {} at offset {}",
                    path.display(),
                    reader.get_ref().position()
                ));
            }
        }
    }

    tracing::info!("Decoded {} packets from {}", count, path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["ttcp", "send", "--port", "9000", "dm", "--to", "2", "--from", "1", "hi"]);
        assert!(cli.is_ok());

        let cli = Cli::try_parse_from(["ttcp", "dump", "packets.bin", "--json"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_connect_defaults_to_configured_name() {
        let mut config = Config::default();
        config.general.name = "Ann".to_string();

        let packet = build_packet(&PacketArgs::Connect { name: None }, &config).unwrap();
        assert_eq!(packet.payload, Payload::ConnectionRequest { name: "Ann".into() });
    }

    #[test]
    fn test_encode_then_dump() {
        let dir = tempdir().unwrap();
        let attachment = dir.path().join("note.txt");
        std::fs::write(&attachment, b"hello").unwrap();
        let stream = dir.path().join("packets.bin");

        let config = Config::default();
        let args = [
            PacketArgs::Text { text: "Hallo, Welt!".into() },
            PacketArgs::File {
                path: attachment,
                mime: "text/plain".into(),
                description: String::new(),
            },
            PacketArgs::Logout,
        ];

        let mut total = 0;
        for arg in &args {
            let packet = build_packet(arg, &config).unwrap();
            total += encode_to_file(&config, &stream, &packet).unwrap();
        }
        assert_eq!(std::fs::metadata(&stream).unwrap().len() as usize, total);

        let bytes = std::fs::read(&stream).unwrap();
        let mut reader = PacketReader::new(Cursor::new(bytes));
        let first = reader.read_packet().unwrap();
        assert_eq!(first.payload, Payload::TextMessage { text: "Hallo, Welt!".into() });
        match reader.read_packet().unwrap().payload {
            Payload::FileMessage(file) => {
                assert_eq!(file.file_name, "note.txt");
                assert_eq!(file.data, b"hello");
            }
            other => panic!("Wrong payload: {:?}", other),
        }

        dump_file(&config, &stream, true).unwrap();
    }
}
