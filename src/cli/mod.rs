pub mod demo;
pub mod keys;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "er_lifecycle")]
#[command(about = "Delegation lifecycle between a base ledger and an ephemeral rollup", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the full lifecycle against an in-process cluster
    Demo {
        /// Path to the TOML config (created with defaults if missing)
        #[arg(long, default_value = "er_lifecycle.toml")]
        config: String,
        /// Skip sled and the identity file
        #[arg(long)]
        in_memory: bool,
    },
    /// Generate a new owner keypair
    Keygen {
        /// Also derive the key from a fresh 12-word mnemonic
        #[arg(long)]
        mnemonic: bool,
    },
    /// Print the account address derived for an owner
    Address {
        /// Owner public key (hex)
        owner: String,
        #[arg(long, default_value = "er_lifecycle.toml")]
        config: String,
    },
}
