mod common;
mod events;
mod listen;
mod session;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use pluto_transport::{Identity, KeyAlgorithm};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "pluto-cli", about = "Node for the Pluto overlay")]
struct Cli {
    /// PEM private key; generated on first use.
    #[arg(long, default_value = "pluto.pem")]
    identity: PathBuf,

    /// Key type for a newly generated identity: ed25519 or rsa.
    #[arg(long, default_value = "ed25519")]
    key_type: KeyAlgorithm,

    /// Unicast port (default: PLUTO_PORT, else ephemeral).
    #[arg(long)]
    port: Option<u16>,

    /// Do not join the multicast discovery group.
    #[arg(long)]
    no_multicast: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the readable identity.
    Whoami,

    /// Run a node and log protocol events.
    Listen,

    /// Create and announce a group, print its messages.
    Host {
        /// Group interest.
        #[arg(long)]
        interest: Uuid,
        /// Group name (default: random).
        #[arg(long)]
        name: Option<Uuid>,
        #[arg(long, default_value = "pluto")]
        access_key: String,
    },

    /// Join an announced group, send stdin lines to it.
    Join {
        #[arg(long)]
        interest: Uuid,
        #[arg(long)]
        name: Uuid,
        #[arg(long, default_value = "pluto")]
        access_key: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let identity = Identity::load_or_generate(&cli.identity, cli.key_type)?;
    let options = common::NodeOptions {
        port: cli.port,
        multicast: !cli.no_multicast,
    };

    match cli.command {
        Command::Whoami => {
            println!("{identity}");
            Ok(())
        }
        Command::Listen => {
            let channels = common::start(identity, &options).await?;
            listen::run(channels).await
        }
        Command::Host {
            interest,
            name,
            access_key,
        } => {
            let name = name.unwrap_or_else(Uuid::new_v4);
            let channels = common::start(identity, &options).await?;
            session::host(channels, interest, name, access_key).await
        }
        Command::Join {
            interest,
            name,
            access_key,
        } => {
            let channels = common::start(identity, &options).await?;
            session::join(channels, interest, name, access_key).await
        }
    }
}
