use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
    time::Duration,
};

use actions::{
    send_tip, ActionError, Attachment, Composer, FollowButton, LikeButton, ProfileForm,
    TIP_PRESETS,
};
use chain::{rpc::RpcLedger, Address, Ledger};
use clap::{Parser, Subcommand};
use config::{Config, ConfigError, Settings};
use content::{pinata::PinataClient, ContentPointer, Resolver};
use feed::FeedAssembler;
use log::{info, warn};
use tokio::time;

mod actions;
mod chain;
mod config;
mod content;
mod feed;
mod render;
#[cfg(test)]
mod testutil;

type Assembler<'a> = FeedAssembler<'a, RpcLedger, PinataClient>;

#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Path to configuration file.
    #[arg(long, default_value = ".drippy.yml")]
    config: PathBuf,

    /// Pinata JWT, overrides `pinata_jwt` from the config file.
    #[arg(long, env = "DRIPPY_PINATA_JWT", hide_env_values = true)]
    pinata_jwt: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(flatten)]
    Wallet(WalletCommand),
    /// Upload a file to the pinning service.
    Upload { file: PathBuf },
    /// Turn a content pointer into a gateway URL.
    Resolve {
        pointer: String,

        /// Only report whether the file is accessible.
        #[arg(long)]
        check: bool,
    },
    /// Print the effective configuration.
    Config,
}

/// Commands that need a connected wallet.
#[derive(Subcommand)]
enum WalletCommand {
    /// Show the latest posts, newest first.
    Feed {
        /// Highest post id to scan.
        #[arg(long)]
        window: Option<u64>,

        /// Rescan every N seconds.
        #[arg(long, value_name = "SECS")]
        watch: Option<u64>,

        /// Retry media that did not load up to N times.
        #[arg(long, value_name = "N", default_value_t = 0)]
        retry_media: u32,
    },
    /// Suggest authors to follow.
    Discover,
    /// Show a profile (yours by default).
    Profile { address: Option<Address> },
    ProfileCreate {
        #[arg(long)]
        username: String,
        #[arg(long, default_value = "")]
        bio: String,
        /// Image to upload as avatar.
        #[arg(long)]
        avatar: Option<PathBuf>,
    },
    ProfileUpdate {
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        bio: Option<String>,
        #[arg(long)]
        avatar: Option<PathBuf>,
    },
    /// Publish a post.
    Post {
        #[arg(default_value = "")]
        text: String,

        /// Image or video to attach.
        #[arg(long, conflicts_with = "pointer")]
        media: Option<PathBuf>,

        /// Attach a file uploaded earlier instead of uploading again.
        #[arg(long)]
        pointer: Option<String>,
    },
    /// Like or unlike a post.
    Like { id: u64 },
    /// Follow or unfollow an account.
    Follow { address: Address },
    /// Send ether to an account.
    Tip { address: Address, amount: String },
}

fn load_settings(path: PathBuf, jwt: Option<String>) -> Result<Settings, ConfigError> {
    let text = fs::read_to_string(path).map_err(ConfigError::Io)?;
    let mut cfg = Config::from_yaml(&text)?;

    if jwt.is_some() {
        cfg.pinata_jwt = jwt;
    }
    cfg.validate()
}

/// Connects to the wallet and returns the ledger bound to its first account.
async fn connect(settings: &Settings) -> Result<(RpcLedger, Address), ExitCode> {
    let ledger = RpcLedger::new(
        settings.rpc_url.as_str(),
        settings.contract,
        settings.confirmation_poll,
    );

    let account = match ledger.request_accounts().await {
        Ok(accounts) => match accounts.first() {
            Some(a) => *a,
            None => {
                eprintln!("Failed to connect wallet: no accounts available");
                return Err(ExitCode::FAILURE);
            }
        },
        Err(e) => {
            eprintln!("Failed to connect wallet: {}", e.user_message());
            return Err(ExitCode::FAILURE);
        }
    };

    let chain_id = match ledger.chain_id().await {
        Ok(id) => id,
        Err(e) => {
            eprintln!("Failed to read chain id: {e}");
            return Err(ExitCode::FAILURE);
        }
    };
    if let Err(e) = settings.check_chain(chain_id) {
        render::config_error(&e);
        return Err(ExitCode::FAILURE);
    }

    info!("Connected as {account} on chain {chain_id}");
    Ok((ledger.with_account(account), account))
}

/// Whether to suggest creating a profile. An unreadable profile counts as present.
async fn needs_profile<L: Ledger + ?Sized>(ledger: &L, viewer: &Address) -> bool {
    match ledger.profile(viewer).await {
        Ok(profile) => profile.is_none(),
        Err(e) => {
            warn!("Could not check your profile: {e}");
            false
        }
    }
}

async fn show_feed(assembler: &Assembler<'_>, viewer: &Address, retry_media: u32) {
    let mut posts = assembler.assemble(viewer).await;

    for _ in 0..retry_media {
        if !posts.iter().any(|p| p.media_missing()) {
            break;
        }
        time::sleep(Duration::from_secs(1)).await;

        for p in posts.iter_mut().filter(|p| p.media_missing()) {
            assembler.retry_media(p).await;
        }
    }

    render::feed(&posts);
}

async fn watch_feed(assembler: &Assembler<'_>, viewer: &Address, every: Duration) {
    assembler
        .watch(viewer, every, |posts| {
            println!("--- {} ---", chrono::Local::now().format("%H:%M:%S"));
            render::feed(&posts);
        })
        .await
}

async fn run(
    command: WalletCommand,
    settings: &Settings,
    ledger: &RpcLedger,
    resolver: &Resolver<PinataClient>,
    viewer: Address,
) -> Result<(), ActionError> {
    let assembler = FeedAssembler::new(ledger, resolver)
        .with_scan(settings.feed)
        .with_discovery(settings.discovery);

    match command {
        WalletCommand::Feed {
            window,
            watch,
            retry_media,
        } => {
            let mut scan = settings.feed;
            if let Some(window) = window.filter(|w| *w > 0) {
                scan.window = window;
            }
            let assembler = assembler.with_scan(scan);

            if needs_profile(ledger, &viewer).await {
                println!("You have no profile yet. Create one with `drippy profile-create --username <NAME>`.\n");
            }

            match watch {
                Some(secs) => watch_feed(&assembler, &viewer, Duration::from_secs(secs.max(1))).await,
                None => show_feed(&assembler, &viewer, retry_media).await,
            }
        }
        WalletCommand::Discover => render::users(&assembler.discover(&viewer).await),
        WalletCommand::Profile { address } => {
            render::profile(&assembler.profile_view(&address.unwrap_or(viewer)).await)
        }
        WalletCommand::ProfileCreate {
            username,
            bio,
            avatar,
        } => {
            let avatar = match avatar {
                Some(path) => Some(Attachment::read(&path).await?),
                None => None,
            };
            let form = ProfileForm {
                username,
                bio,
                avatar,
                current_avatar: ContentPointer::default(),
            };

            render::receipt(&form.submit(ledger, resolver, false).await?);
        }
        WalletCommand::ProfileUpdate {
            username,
            bio,
            avatar,
        } => {
            let current = ledger
                .profile(&viewer)
                .await
                .map_err(ActionError::Chain)?
                .ok_or(ActionError::Invalid("Create a profile first"))?;
            let avatar = match avatar {
                Some(path) => Some(Attachment::read(&path).await?),
                None => None,
            };
            let form = ProfileForm {
                username: username.unwrap_or(current.username),
                bio: bio.unwrap_or(current.bio),
                avatar,
                current_avatar: ContentPointer::new(current.avatar),
            };

            render::receipt(&form.submit(ledger, resolver, true).await?);
        }
        WalletCommand::Post {
            text,
            media,
            pointer,
        } => {
            let mut composer = Composer::new(text);
            if let Some(path) = media {
                composer = composer.with_attachment(Attachment::read(&path).await?);
            }
            if let Some(pointer) = pointer {
                composer = composer.with_uploaded(ContentPointer::new(pointer));
            }

            render::receipt(&composer.submit(ledger, resolver).await?);
        }
        WalletCommand::Like { id } => {
            let post = ledger
                .post(id)
                .await
                .map_err(ActionError::Chain)?
                .ok_or(ActionError::Invalid("Post not found"))?;
            let liked = ledger
                .has_liked(id, &viewer)
                .await
                .map_err(ActionError::Chain)?;

            let mut button = LikeButton::new(id, liked, post.like_count);
            let state = button.toggle(ledger).await?;
            println!(
                "{} post #{id} ({} likes)",
                if state.liked { "Liked" } else { "Unliked" },
                state.count
            );
        }
        WalletCommand::Follow { address } => {
            if address == viewer {
                return Err(ActionError::Invalid("You cannot follow yourself"));
            }
            let following = ledger
                .is_following(&viewer, &address)
                .await
                .map_err(ActionError::Chain)?;

            let mut button = FollowButton::new(address, following);
            let now = if button.toggle(ledger).await? {
                "Following"
            } else {
                "Unfollowed"
            };
            println!("{now} {}", address.abbreviated());
        }
        WalletCommand::Tip { address, amount } => {
            match send_tip(ledger, &viewer, &address, &amount).await {
                Ok(receipt) => render::receipt(&receipt),
                Err(e @ ActionError::Invalid(_)) => {
                    eprintln!("Common amounts: {}", TIP_PRESETS.join(", "));
                    return Err(e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    Ok(())
}

async fn upload(resolver: &Resolver<PinataClient>, path: &Path) -> Result<(), ActionError> {
    let file = Attachment::read(path).await?;
    let pointer = resolver
        .upload(&file.name, &file.bytes)
        .await
        .map_err(ActionError::Content)?;

    println!("{pointer}");
    match resolver.display_url(&pointer).await {
        Some(url) => println!("{url}"),
        None => warn!("{pointer} is not accessible yet"),
    }

    Ok(())
}

async fn resolve(
    resolver: &Resolver<PinataClient>,
    pointer: ContentPointer,
    check: bool,
) -> Result<(), ActionError> {
    if check {
        match resolver.file_info(&pointer).await {
            Ok(info) => println!(
                "{}: accessible, cid {} ({})",
                info.id,
                info.cid,
                info.name.as_deref().unwrap_or("unnamed")
            ),
            Err(e) => println!("{pointer}: not accessible ({e})"),
        }
        return Ok(());
    }

    match resolver.display_url(&pointer).await {
        Some(url) => {
            println!("{url}");
            Ok(())
        }
        None => Err(ActionError::MediaPending(pointer)),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Args {
        config,
        pinata_jwt,
        command,
    } = Args::parse();

    let settings = match load_settings(config, pinata_jwt) {
        Ok(s) => s,
        Err(e) => {
            render::config_error(&e);
            return ExitCode::FAILURE;
        }
    };

    let resolver = Resolver::new(
        PinataClient::new(
            Some(settings.pinata_jwt.clone()),
            &settings.pinata_upload_url,
            &settings.pinata_api_url,
        ),
        settings.gateway_url.as_str(),
    );

    let res = match command {
        Command::Config => {
            render::settings(&settings);
            Ok(())
        }
        Command::Upload { file } => upload(&resolver, &file).await,
        Command::Resolve { pointer, check } => {
            resolve(&resolver, ContentPointer::new(pointer), check).await
        }
        Command::Wallet(c) => {
            let (ledger, viewer) = match connect(&settings).await {
                Ok(v) => v,
                Err(code) => return code,
            };
            run(c, &settings, &ledger, &resolver, viewer).await
        }
    };

    match res {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.user_message());
            ExitCode::FAILURE
        }
    }
}
