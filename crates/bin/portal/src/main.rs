//! portal: command line client for the solana link board
//!
//! ## usage
//!
//! ```bash
//! # create the board account keypair once
//! portal keygen --out board.json
//!
//! # show the board (reconnects a previously approved wallet)
//! portal --config portal.toml status
//!
//! # approve the wallet, create the board, add a link
//! portal connect
//! portal init
//! portal submit https://media.giphy.com/media/xyz/giphy.gif
//!
//! # offline walk-through against the in-memory runtime
//! portal demo
//! ```

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use gif_portal::{
    GatewayConfig, InMemoryRuntime, Keypair, KeypairWallet, Notice, NoticeLevel, Portal,
    PortalConfig, Pubkey, RpcRuntime, View, WalletProvider,
};

#[derive(Parser)]
#[command(name = "portal")]
#[command(about = "wallet-gated client for a shared solana link board")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// config file
    #[arg(short, long, default_value = "portal.toml", env = "PORTAL_CONFIG")]
    config: PathBuf,

    /// print the view as json
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// reconnect a trusted wallet and show the board
    Status,

    /// connect the wallet, asking for approval if needed
    Connect,

    /// create the board account (once)
    Init,

    /// add a link to the board
    Submit {
        /// link to add
        link: String,
    },

    /// write a fresh keypair file, e.g. for the board account
    Keygen {
        /// output file
        #[arg(short, long)]
        out: PathBuf,

        /// overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// walk through the board lifecycle against the in-memory runtime
    Demo,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "portal=info,gif_portal=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted");
                cancel.cancel();
            }
        }
    });

    match cli.command {
        Commands::Keygen { out, force } => keygen(out, force),
        Commands::Demo => demo(cli.json, &cancel).await,
        command => {
            let config = PortalConfig::load(&cli.config)
                .with_context(|| format!("loading {}", cli.config.display()))?;
            run(command, &config, cli.json, &cancel).await
        }
    }
}

async fn run(command: Commands, config: &PortalConfig, json: bool, cancel: &CancellationToken) -> Result<()> {
    info!("rpc endpoint: {}", config.endpoint());
    let wallet = load_wallet(config)?;
    let gateway = config.gateway_config().context("loading board keypair")?;
    let (portal, mut notices) = Portal::new(wallet, Arc::new(RpcRuntime::new()), gateway);

    portal.start(cancel.clone());
    portal.on_ready(cancel).await;

    let explicit = !matches!(command, Commands::Status);
    if explicit && portal.connect(cancel).await.is_err() {
        print_notices(&mut notices);
        bail!("wallet not connected");
    }
    if portal.session().is_bound() {
        portal.loaded(cancel).await?;
    }

    let outcome = match command {
        Commands::Init => portal.initialize(cancel).await,
        Commands::Submit { link } => {
            portal.set_input(link);
            portal.submit(cancel).await
        }
        _ => Ok(()),
    };

    print_notices(&mut notices);
    print_view(&portal, json)?;
    outcome.map_err(Into::into)
}

/// keypair wallet from the config, `None` when no wallet is configured
fn load_wallet(config: &PortalConfig) -> Result<Option<Arc<dyn WalletProvider>>> {
    let Some(path) = &config.wallet.keypair else {
        return Ok(None);
    };
    let keypair = Keypair::read_file(path).with_context(|| format!("reading wallet {}", path.display()))?;

    let mut wallet = KeypairWallet::new(keypair).with_approver(Arc::new(approve_on_stdin));
    if let Some(trust) = &config.wallet.trust_file {
        wallet = wallet.with_trust_file(trust);
    }
    Ok(Some(Arc::new(wallet)))
}

fn approve_on_stdin(pubkey: &Pubkey) -> bool {
    eprint!("allow this client to use wallet {}? [y/N] ", pubkey);
    let _ = std::io::stderr().flush();
    let mut answer = String::new();
    if std::io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim(), "y" | "Y" | "yes")
}

fn keygen(out: PathBuf, force: bool) -> Result<()> {
    if out.exists() && !force {
        bail!("{} exists, pass --force to overwrite", out.display());
    }
    let keypair = Keypair::generate();
    keypair
        .write_file(&out)
        .with_context(|| format!("writing {}", out.display()))?;
    println!("{}", keypair.pubkey());
    Ok(())
}

async fn demo(json: bool, cancel: &CancellationToken) -> Result<()> {
    let runtime = Arc::new(InMemoryRuntime::new());
    let program_id = Keypair::generate().pubkey();
    let wallet: Arc<dyn WalletProvider> = Arc::new(KeypairWallet::new(Keypair::generate()));
    let (portal, mut notices) =
        Portal::new(Some(wallet), runtime.clone(), GatewayConfig::new(program_id, Keypair::generate()));

    println!("== page load, wallet not trusted yet");
    portal.start(cancel.clone());
    portal.on_ready(cancel).await;
    print_view(&portal, json)?;

    println!("== connect");
    portal.connect(cancel).await?;
    portal.loaded(cancel).await?;
    print_view(&portal, json)?;

    println!("== initialize board {}", portal.board_address());
    portal.initialize(cancel).await?;
    print_view(&portal, json)?;

    println!("== submit two links");
    for link in ["https://media.giphy.com/media/a/giphy.gif", "https://media.giphy.com/media/b/giphy.gif"] {
        portal.set_input(link);
        portal.submit(cancel).await?;
    }
    print_view(&portal, json)?;

    println!("== submit nothing");
    let _ = portal.submit(cancel).await;
    print_notices(&mut notices);

    println!("== submit while the network is down");
    runtime.fail_next_execute(gif_portal::PortalError::Network("connection reset".into()));
    portal.set_input("https://media.giphy.com/media/lost/giphy.gif");
    let _ = portal.submit(cancel).await;
    print_notices(&mut notices);
    print_view(&portal, json)?;

    Ok(())
}

fn print_notices(notices: &mut UnboundedReceiver<Notice>) {
    while let Ok(notice) = notices.try_recv() {
        let tag = match notice.level {
            NoticeLevel::Info => "info",
            NoticeLevel::Warning => "warning",
            NoticeLevel::Error => "error",
        };
        eprintln!("[{}] {}", tag, notice.message);
    }
}

fn print_view(portal: &Portal, json: bool) -> Result<()> {
    let view = portal.view();
    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    match view {
        View::Connect => println!("not connected, run `portal connect`"),
        View::Loading => println!("loading board..."),
        View::Initialize => println!(
            "board {} does not exist yet, run `portal init`",
            portal.board_address()
        ),
        View::Retry { reason } => println!("could not read the board: {}\ntry again later", reason),
        View::Board { entries, pending_input } => {
            if entries.is_empty() {
                println!("no links yet");
            }
            for (i, entry) in entries.iter().enumerate() {
                println!("{:>3}. {}  (by {})", i + 1, entry.link, entry.submitter);
            }
            if !pending_input.is_empty() {
                println!("pending: {}", pending_input);
            }
        }
    }
    Ok(())
}
