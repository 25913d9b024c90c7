use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// peerdrop - send a file straight to another machine.
#[derive(Parser, Debug)]
#[command(name = "peerdrop", author, version, about)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file to use instead of ~/.config/peerdrop/config.toml.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send a file to a waiting receiver.
    Send {
        /// File to send.
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Connection code printed by the receiver.
        #[arg(long, short, value_name = "CODE")]
        session: String,

        /// Relay WebSocket URL (overrides the config file).
        #[arg(long, value_name = "URL")]
        relay: Option<String>,
    },

    /// Wait for a file and save it.
    Receive {
        /// Relay WebSocket URL (overrides the config file).
        #[arg(long, value_name = "URL")]
        relay: Option<String>,

        /// Directory to save into (overrides the config file).
        #[arg(long, short, value_name = "DIR")]
        out: Option<PathBuf>,

        /// Reuse a connection code instead of generating one.
        #[arg(long, short, value_name = "CODE")]
        session: Option<String>,
    },

    /// Run the signaling relay.
    Relay {
        /// Address to listen on.
        #[arg(long, value_name = "ADDR", default_value = "0.0.0.0:8787")]
        bind: SocketAddr,
    },
}
