// fleetlink — command-line peer for the bot-fleet exchange
//
// Drives an exchange node over the spool transport: build and inspect
// envelopes, share facts with peers, and encrypt side-channel files.

mod config;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::*;
use fleetlink_core::{
    format_envelope, parse_envelope, ChannelId, DeleteScope, ExchangeNode, FileCodec, HelpLevel,
    Payload, ReceiverSet, ShareOutcome, ShareRequest, SledStorage, SpoolTransport,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fleetlink")]
#[command(about = "Fleetlink — exchange protocol peer for cooperating bots", long_about = None)]
#[command(version)]
struct Cli {
    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write default config and create the spool channels
    Init,
    /// Show or change settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Print the wire text of an envelope
    Envelope(EnvelopeArgs),
    /// Parse an envelope from a file
    Inspect { file: PathBuf },
    /// Share an envelope with peers
    Share {
        #[command(flatten)]
        envelope: EnvelopeArgs,
        /// Attach a file
        #[arg(long)]
        file: Option<PathBuf>,
        /// Send the attachment without encrypting it
        #[arg(long, requires = "file")]
        no_encrypt: bool,
    },
    /// Report a bad user
    BadUser { uid: i64 },
    /// Record a detection and share the resulting score
    Score {
        uid: i64,
        /// Group the user was detected in
        #[arg(short, long)]
        group: i64,
    },
    /// Count regex hits and share the topic's counters with the REGEX peer
    RegexCount {
        topic: String,
        /// Pattern that matched; repeat once per hit
        #[arg(long = "hit", value_name = "PATTERN")]
        hits: Vec<String>,
    },
    /// Ask the USER peer for help with a user
    HelpRequest {
        #[arg(value_enum)]
        level: LevelArg,
        gid: i64,
        uid: i64,
        #[arg(long, value_enum, default_value = "single")]
        scope: ScopeArg,
    },
    /// Encrypt a file with the fleet key
    Encrypt { src: PathBuf, dst: PathBuf },
    /// Decrypt a file with the fleet key
    Decrypt { src: PathBuf, dst: PathBuf },
    /// Show channel and local state
    Status,
}

#[derive(Subcommand)]
enum ConfigAction {
    Show,
    Get { key: String },
    Set { key: String, value: String },
}

#[derive(Args)]
struct EnvelopeArgs {
    /// Receivers, comma separated
    #[arg(long, value_delimiter = ',', required = true)]
    to: Vec<String>,
    action: String,
    #[arg(value_name = "TYPE")]
    action_type: String,
    /// JSON payload (bool, integer, string or object)
    #[arg(long)]
    data: Option<String>,
}

impl EnvelopeArgs {
    fn receivers(&self) -> ReceiverSet {
        self.to.iter().map(|r| r.trim()).collect()
    }

    fn payload(&self) -> Result<Option<Payload>> {
        self.data
            .as_deref()
            .map(|raw| serde_json::from_str(raw).context("Invalid --data payload"))
            .transpose()
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum LevelArg {
    Ban,
    Delete,
}

#[derive(Clone, Copy, ValueEnum)]
enum ScopeArg {
    Single,
    Global,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging(cli.log_json, cli.log_dir.as_deref());

    match cli.command {
        Commands::Init => cmd_init(),
        Commands::Config { action } => cmd_config(action),
        Commands::Envelope(args) => cmd_envelope(args),
        Commands::Inspect { file } => cmd_inspect(&file),
        Commands::Share {
            envelope,
            file,
            no_encrypt,
        } => cmd_share(envelope, file, no_encrypt).await,
        Commands::BadUser { uid } => cmd_bad_user(uid).await,
        Commands::Score { uid, group } => cmd_score(uid, group).await,
        Commands::RegexCount { topic, hits } => cmd_regex_count(topic, hits).await,
        Commands::HelpRequest {
            level,
            gid,
            uid,
            scope,
        } => cmd_help_request(level, scope, gid, uid).await,
        Commands::Encrypt { src, dst } => cmd_codec(true, &src, &dst).await,
        Commands::Decrypt { src, dst } => cmd_codec(false, &src, &dst).await,
        Commands::Status => cmd_status(),
    }
}

fn init_logging(json: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "fleetlink.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let builder = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false);
            if json {
                builder.json().init();
            } else {
                builder.init();
            }
            Some(guard)
        }
        None if json => {
            tracing_subscriber::fmt().with_env_filter(filter).json().init();
            None
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

fn channels(config: &config::Config) -> [(&'static str, ChannelId); 5] {
    let c = &config.exchange.channels;
    [
        ("exchange", c.exchange),
        ("hide", c.hide),
        ("critical", c.critical),
        ("logging", c.logging),
        ("debug", c.debug),
    ]
}

fn open_spool(config: &config::Config) -> Result<Arc<SpoolTransport>> {
    let mut spool = SpoolTransport::new(config.spool_dir()?);
    if let Some(interval) = config.flood_interval() {
        spool = spool.with_min_interval(interval);
    }
    Ok(Arc::new(spool))
}

fn open_node(config: &config::Config) -> Result<ExchangeNode> {
    let spool = open_spool(config)?;
    let state_dir = config::Config::state_dir()?;
    let backend = SledStorage::open(&state_dir.to_string_lossy())
        .context("Failed to open local state")?;
    ExchangeNode::open(config.exchange.clone(), spool, Arc::new(backend))
        .context("Failed to start exchange node")
}

fn cmd_init() -> Result<()> {
    println!("{}", "Initializing fleetlink...".bold());
    println!();

    let config = config::Config::load()?;
    println!(
        "  {} Configuration: {}",
        "✓".green(),
        config::Config::config_file()?.display()
    );

    let spool = open_spool(&config)?;
    for (name, channel) in channels(&config) {
        spool
            .open_channel(channel)
            .with_context(|| format!("Failed to create {} channel", name))?;
        println!("  {} Channel {:<9} {}", "✓".green(), name, channel);
    }

    std::fs::create_dir_all(&config.exchange.scratch_dir)
        .context("Failed to create scratch directory")?;
    println!(
        "  {} Scratch: {}",
        "✓".green(),
        config.exchange.scratch_dir.display()
    );
    println!();

    println!("{}", "Next steps:".bold());
    println!(
        "  • Set identity: {}",
        "fleetlink config set sender <NAME>".bright_green()
    );
    println!(
        "  • Set fleet key: {}",
        "fleetlink config set file_key <KEY>".bright_green()
    );

    Ok(())
}

fn cmd_config(action: ConfigAction) -> Result<()> {
    let mut config = config::Config::load()?;

    match action {
        ConfigAction::Show => {
            println!("{}", "Configuration".bold());
            println!();
            for (key, value) in config.list() {
                println!("  {:<20} {}", key.bright_cyan(), value);
            }
            println!();
            println!("{}", "Receivers:".bold());
            for (topic, receivers) in config.exchange.receivers.topics() {
                let names: Vec<&str> = receivers.iter().collect();
                println!("  {:<10} {}", topic.bright_cyan(), names.join(", "));
            }
        }
        ConfigAction::Get { key } => match config.get(&key) {
            Some(value) => println!("{} = {}", key.bright_cyan(), value),
            None => anyhow::bail!("Unknown config key: {}", key),
        },
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            println!("{} Set {}", "✓".green(), key.bright_cyan());
        }
    }

    Ok(())
}

fn cmd_envelope(args: EnvelopeArgs) -> Result<()> {
    let config = config::Config::load()?;
    let receivers = args
        .receivers()
        .without(&config.exchange.sender);
    let data = args.payload()?;
    let text = format_envelope(
        &config.exchange.sender,
        &receivers,
        &args.action,
        &args.action_type,
        data.as_ref(),
    )?;
    println!("{}", text);
    Ok(())
}

fn cmd_inspect(file: &Path) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let envelope = parse_envelope(&text)?;
    let config = config::Config::load()?;

    println!("{}", "Envelope".bold());
    println!("  From:   {}", envelope.from.bright_cyan());
    let to: Vec<&str> = envelope.to.iter().collect();
    println!("  To:     {}", to.join(", "));
    println!("  Action: {} / {}", envelope.action, envelope.action_type);
    match &envelope.data {
        Some(data) => println!("  Data:   {}", serde_json::to_string(data)?),
        None => println!("  Data:   {}", "(none)".dimmed()),
    }
    if envelope.is_addressed_to(&config.exchange.sender) {
        println!("  {} addressed to {}", "→".bright_green(), config.exchange.sender);
    }
    Ok(())
}

fn report(outcome: &ShareOutcome) {
    match outcome {
        ShareOutcome::Delivered {
            channel,
            message_id,
        } => println!(
            "{} Delivered to channel {} as {}",
            "✓".green(),
            channel,
            message_id
        ),
        ShareOutcome::NoReceivers => println!("{}", "No receivers left, nothing sent.".dimmed()),
        ShareOutcome::NothingToShare => println!("{}", "Nothing to share.".dimmed()),
        ShareOutcome::Redispatched {
            failed_channel,
            error,
        } => println!(
            "{} Channel {} failed ({}), switched to hide channel",
            "!".yellow(),
            failed_channel,
            error
        ),
        ShareOutcome::Undelivered { channel, error } => {
            println!("{} Channel {} failed: {}", "✗".red(), channel, error)
        }
    }
}

async fn run_share<F, Fut>(share: F) -> Result<()>
where
    F: FnOnce(ExchangeNode) -> Fut,
    Fut: std::future::Future<Output = Result<(ShareOutcome, ExchangeNode)>>,
{
    let config = config::Config::load()?;
    let node = open_node(&config)?;
    let (outcome, node) = share(node).await?;
    node.shutdown().await;
    tracing::debug!("Share finished: {:?}", outcome);
    report(&outcome);
    if node.is_degraded() {
        println!("{}", "This run fell back to the hide channel.".dimmed());
    }
    Ok(())
}

async fn cmd_share(args: EnvelopeArgs, file: Option<PathBuf>, no_encrypt: bool) -> Result<()> {
    let data = args.payload()?;
    run_share(|node| async move {
        let mut request = ShareRequest::new(args.receivers(), args.action, args.action_type);
        request.data = data;
        if let Some(file) = file {
            request = request.with_file(file);
            if no_encrypt {
                request = request.unencrypted();
            }
        }
        let outcome = node.broadcaster().share(request).await?;
        Ok((outcome, node))
    })
    .await
}

async fn cmd_bad_user(uid: i64) -> Result<()> {
    run_share(|node| async move {
        let outcome = node.actions().share_bad_user(uid).await?;
        Ok((outcome, node))
    })
    .await
}

async fn cmd_score(uid: i64, gid: i64) -> Result<()> {
    run_share(|node| async move {
        let users = node.actions().users();
        if !users.add_detection(uid, gid) {
            println!("{}", "Detection already recorded.".dimmed());
        }
        println!("Detections: {}", users.detection_count(uid));
        let outcome = node.actions().update_score(uid).await?;
        Ok((outcome, node))
    })
    .await
}

async fn cmd_regex_count(topic: String, hits: Vec<String>) -> Result<()> {
    run_share(|node| async move {
        let counters = node.actions().counters();
        if !counters.has_topic(&topic) {
            anyhow::bail!(
                "Unknown regex topic: {} (configured: {})",
                topic,
                counters.topics().join(", ")
            );
        }
        for pattern in &hits {
            counters.record(&topic, pattern)?;
        }
        let outcome = node.actions().share_regex_count(&topic).await?;
        Ok((outcome, node))
    })
    .await
}

async fn cmd_help_request(level: LevelArg, scope: ScopeArg, gid: i64, uid: i64) -> Result<()> {
    let level = match (level, scope) {
        (LevelArg::Ban, _) => HelpLevel::Ban,
        (LevelArg::Delete, ScopeArg::Single) => HelpLevel::Delete(DeleteScope::Single),
        (LevelArg::Delete, ScopeArg::Global) => HelpLevel::Delete(DeleteScope::Global),
    };
    run_share(|node| async move {
        let outcome = node.actions().ask_for_help(level, gid, uid).await?;
        Ok((outcome, node))
    })
    .await
}

async fn cmd_codec(encrypt: bool, src: &Path, dst: &Path) -> Result<()> {
    let config = config::Config::load()?;
    let codec = FileCodec::new(&config.exchange.file_key).with_rounds(config.exchange.kdf_rounds);
    if encrypt {
        codec.encrypt_file(src, dst).await?;
        println!("{} Encrypted {} → {}", "✓".green(), src.display(), dst.display());
    } else {
        codec.decrypt_file(src, dst).await?;
        println!("{} Decrypted {} → {}", "✓".green(), src.display(), dst.display());
    }
    Ok(())
}

fn cmd_status() -> Result<()> {
    let config = config::Config::load()?;
    let spool = open_spool(&config)?;

    println!("{}", "Fleetlink Status".bold());
    println!();
    println!("Sender:   {}", config.exchange.sender.bright_cyan());
    println!("Spool:    {}", spool.root().display());
    println!();

    println!("{}", "Channels:".bold());
    for (name, channel) in channels(&config) {
        if spool.is_open(channel) {
            let count = spool.read_channel(channel).map(|r| r.len()).unwrap_or(0);
            println!(
                "  {} {:<9} {:<8} {} messages",
                "●".green(),
                name,
                channel,
                count
            );
        } else {
            println!("  {} {:<9} {:<8} unusable", "●".red(), name, channel);
        }
    }
    println!();

    let node = open_node(&config)?;
    tracing::info!("Status read from {}", spool.root().display());
    println!("Known users: {}", node.actions().users().len());

    Ok(())
}
