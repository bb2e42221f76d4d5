//! Command-line surface: argument parsing and per-command wiring of the
//! client stack.

use std::collections::HashMap;
use std::io::{stderr, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use crate::api::{connect, ApiError, ClientStack};
use crate::auth::open_store;
use crate::buildinfo;
use crate::cache::{CacheStore, KeyProvider, KeyringKeyProvider, StaticKeyProvider};
use crate::config::Config;
use crate::models::{ItemCreate, ItemData, ItemUpdate, ListParams};
use crate::service::{FileService, ItemService};

#[derive(Parser)]
#[command(name = "stashkeep", version, about = "Encrypted personal data keeper client")]
pub struct Cli {
    /// Path to the config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the server base URL.
    #[arg(long, global = true)]
    pub server: Option<String>,

    /// Override the log level (error|warn|info|debug|trace).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create an account.
    Register {
        #[arg(long)]
        login: String,
        /// Prompted for when omitted.
        #[arg(long)]
        password: Option<String>,
    },
    /// Log in and store the session.
    Login {
        #[arg(long)]
        login: String,
        /// Prompted for when omitted.
        #[arg(long)]
        password: Option<String>,
    },
    /// End the session locally and, best effort, remotely.
    Logout,
    /// Show whether the stored session is still valid.
    Status,
    /// List items.
    List {
        /// Filter by title substring.
        #[arg(long)]
        search: Option<String>,
        /// Filter by type: TEXT|CREDENTIAL|CARD|BINARY.
        #[arg(long = "type")]
        item_type: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        offset: Option<u32>,
    },
    /// Show one item.
    Get { id: Uuid },
    /// Create an item.
    Create {
        #[arg(long)]
        title: String,
        #[command(flatten)]
        data: ItemDataArgs,
        /// Metadata as comma-separated key=value pairs.
        #[arg(long)]
        meta: Option<String>,
    },
    /// Update an item.
    Update {
        id: Uuid,
        #[arg(long)]
        title: Option<String>,
        #[command(flatten)]
        data: ItemDataArgs,
        /// Metadata as comma-separated key=value pairs.
        #[arg(long)]
        meta: Option<String>,
    },
    /// Delete an item.
    Delete { id: Uuid },
    /// Upload a file and print its id.
    Upload { path: PathBuf },
    /// Download a file to a local path.
    Download { id: Uuid, out: PathBuf },
    /// Print a shell completion script to stdout.
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
    /// Print version and build metadata.
    Version,
}

/// Flags feeding the item payload union; which ones are required depends on
/// the chosen type.
#[derive(Args, Default)]
pub struct ItemDataArgs {
    /// Payload type: TEXT|CREDENTIAL|CARD|BINARY.
    #[arg(long = "type")]
    pub item_type: Option<String>,
    /// Value for TEXT.
    #[arg(long)]
    pub value: Option<String>,
    /// Login for CREDENTIAL.
    #[arg(long)]
    pub login: Option<String>,
    /// Password for CREDENTIAL.
    #[arg(long)]
    pub password: Option<String>,
    /// Card number for CARD.
    #[arg(long)]
    pub card_number: Option<String>,
    /// Card holder for CARD.
    #[arg(long)]
    pub card_holder: Option<String>,
    /// Expiry (MM/YY) for CARD.
    #[arg(long)]
    pub expiry_date: Option<String>,
    /// CVV for CARD.
    #[arg(long)]
    pub cvv: Option<String>,
    /// File name for BINARY.
    #[arg(long)]
    pub filename: Option<String>,
    /// File UUID for BINARY.
    #[arg(long)]
    pub binary_id: Option<Uuid>,
}

pub async fn run(cli: Cli) -> Result<()> {
    let mut cfg = Config::load(cli.config.as_deref())?;
    if let Some(server) = cli.server {
        cfg.server.base_url = server;
    }
    if let Some(level) = cli.log_level {
        cfg.log.level = level;
    }
    init_tracing(&cfg);

    match cli.command {
        Command::Register { login, password } => {
            let password = password_or_prompt(password)?;
            let stack = open_stack(&cfg)?;
            stack.auth.register(&login, &password).await?;
            println!("OK");
        }
        Command::Login { login, password } => {
            let password = password_or_prompt(password)?;
            let stack = open_stack(&cfg)?;
            stack.auth.login(&login, &password).await?;
            println!("OK");
        }
        Command::Logout => {
            let stack = open_stack(&cfg)?;
            stack.auth.logout().await?;
            println!("OK");
        }
        Command::Status => {
            let stack = open_stack(&cfg)?;
            match stack.auth.verify().await {
                Ok(info) => println!("logged in as {}", info.user_id),
                Err(ApiError::NotAuthenticated) => println!("not logged in"),
                Err(err) => bail!("session invalid: {err}"),
            }
        }
        Command::List {
            search,
            item_type,
            limit,
            offset,
        } => {
            let svc = open_items(&cfg)?;
            let list = svc
                .list(&ListParams {
                    item_type,
                    search,
                    limit,
                    offset,
                })
                .await?;
            for item in list.items.unwrap_or_default() {
                println!(
                    "{}\t{}",
                    item.id.map(|id| id.to_string()).unwrap_or_default(),
                    item.title.unwrap_or_default()
                );
            }
        }
        Command::Get { id } => {
            let svc = open_items(&cfg)?;
            let item = svc.get(id).await?;
            println!("{}", serde_json::to_string_pretty(&item)?);
        }
        Command::Create { title, data, meta } => {
            let body = ItemCreate {
                title,
                data: build_item_data(&data)?,
                meta: meta.as_deref().map(parse_meta),
            };
            let svc = open_items(&cfg)?;
            let summary = svc.create(&body).await?;
            match summary.id {
                Some(id) => println!("{id}"),
                None => println!("OK"),
            }
        }
        Command::Update {
            id,
            title,
            data,
            meta,
        } => {
            let payload = if data.item_type.is_some() {
                Some(build_item_data(&data)?)
            } else {
                None
            };
            let body = ItemUpdate {
                title,
                data: payload,
                meta: meta.as_deref().map(parse_meta),
            };
            let svc = open_items(&cfg)?;
            svc.update(id, &body).await?;
            println!("OK");
        }
        Command::Delete { id } => {
            let svc = open_items(&cfg)?;
            svc.delete(id).await?;
            println!("OK");
        }
        Command::Upload { path } => {
            let stack = open_stack(&cfg)?;
            let svc = FileService::new(Arc::new(stack.api), stack.http);
            let id = svc.upload(&path).await?;
            println!("{id}");
        }
        Command::Download { id, out } => {
            let stack = open_stack(&cfg)?;
            let svc = FileService::new(Arc::new(stack.api), stack.http);
            let bytes = svc.download(id).await?;
            std::fs::write(&out, bytes)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("OK");
        }
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            let bin_name = cmd.get_name().to_string();
            clap_complete::generate(shell, &mut cmd, bin_name, &mut std::io::stdout());
        }
        Command::Version => {
            println!("{}", buildinfo::render());
        }
    }
    Ok(())
}

fn init_tracing(cfg: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.log.level.clone()));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(stderr))
        .with(filter)
        .init();
}

fn open_stack(cfg: &Config) -> Result<ClientStack> {
    let store = open_store(&cfg.auth);
    Ok(connect(cfg, store)?)
}

fn open_items(cfg: &Config) -> Result<ItemService> {
    let stack = open_stack(cfg)?;
    let cache = if cfg.cache.enabled {
        // The memory credential backend has no keyring; pair it with a fixed
        // key so nothing of that mode outlives the machine's trust decisions.
        let keys: Arc<dyn KeyProvider> = if cfg.auth.backend == "memory" {
            Arc::new(StaticKeyProvider([0u8; 32]))
        } else {
            Arc::new(KeyringKeyProvider::new(cfg.auth.service.clone()))
        };
        Some(Arc::new(CacheStore::open(
            &cfg.cache_path()?,
            keys,
            cfg.cache.ttl_minutes,
        )?))
    } else {
        None
    };
    Ok(ItemService::new(Arc::new(stack.api), cache))
}

fn password_or_prompt(flag: Option<String>) -> Result<String> {
    if let Some(p) = flag {
        return Ok(p);
    }
    let _ = stderr().flush();
    let password = rpassword::prompt_password("Password: ").context("failed to read password")?;
    if password.is_empty() {
        bail!("password must not be empty");
    }
    Ok(password)
}

fn build_item_data(args: &ItemDataArgs) -> Result<ItemData> {
    let ty = args
        .item_type
        .as_deref()
        .unwrap_or("TEXT")
        .trim()
        .to_uppercase();
    match ty.as_str() {
        "TEXT" => Ok(ItemData::Text {
            value: required(&args.value, "--value is required for TEXT")?,
        }),
        "CREDENTIAL" => Ok(ItemData::Credential {
            login: required(&args.login, "--login is required for CREDENTIAL")?,
            password: required(&args.password, "--password is required for CREDENTIAL")?,
        }),
        "CARD" => Ok(ItemData::Card {
            card_number: required(&args.card_number, "--card-number is required for CARD")?,
            card_holder: required(&args.card_holder, "--card-holder is required for CARD")?,
            expiry_date: required(&args.expiry_date, "--expiry-date is required for CARD")?,
            cvv: required(&args.cvv, "--cvv is required for CARD")?,
        }),
        "BINARY" => Ok(ItemData::Binary {
            filename: required(&args.filename, "--filename is required for BINARY")?,
            id: args
                .binary_id
                .context("--binary-id is required for BINARY")?,
        }),
        other => bail!("unsupported type {other}, use TEXT|CREDENTIAL|CARD|BINARY"),
    }
}

fn required(value: &Option<String>, message: &str) -> Result<String> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => bail!("{message}"),
    }
}

fn parse_meta(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| {
            let pair = pair.trim();
            let (k, v) = pair.split_once('=')?;
            let k = k.trim();
            if k.is_empty() {
                return None;
            }
            Some((k.to_string(), v.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_meta_splits_pairs_and_skips_garbage() {
        let meta = parse_meta("env=prod, owner = ann ,broken,=nokey");
        assert_eq!(meta.len(), 2);
        assert_eq!(meta.get("env").map(String::as_str), Some("prod"));
        assert_eq!(meta.get("owner").map(String::as_str), Some("ann"));
    }

    #[test]
    fn item_data_defaults_to_text() {
        let data = build_item_data(&ItemDataArgs {
            value: Some("hello".to_string()),
            ..ItemDataArgs::default()
        })
        .unwrap();
        assert_eq!(
            data,
            ItemData::Text {
                value: "hello".to_string()
            }
        );
    }

    #[test]
    fn item_data_validates_per_type() {
        assert!(build_item_data(&ItemDataArgs::default()).is_err());
        assert!(build_item_data(&ItemDataArgs {
            item_type: Some("CREDENTIAL".to_string()),
            login: Some("ann".to_string()),
            ..ItemDataArgs::default()
        })
        .is_err());
        assert!(build_item_data(&ItemDataArgs {
            item_type: Some("BINARY".to_string()),
            filename: Some("a.bin".to_string()),
            ..ItemDataArgs::default()
        })
        .is_err());
        assert!(build_item_data(&ItemDataArgs {
            item_type: Some("GIF".to_string()),
            ..ItemDataArgs::default()
        })
        .is_err());

        let card = build_item_data(&ItemDataArgs {
            item_type: Some("card".to_string()),
            card_number: Some("4111111111111111".to_string()),
            card_holder: Some("ANN SMITH".to_string()),
            expiry_date: Some("12/30".to_string()),
            cvv: Some("123".to_string()),
            ..ItemDataArgs::default()
        })
        .unwrap();
        assert!(matches!(card, ItemData::Card { .. }));
    }

    #[test]
    fn cli_parses_list_flags() {
        let cli = Cli::try_parse_from([
            "stashkeep", "list", "--type", "TEXT", "--search", "note", "--limit", "5",
        ])
        .unwrap();
        match cli.command {
            Command::List {
                search,
                item_type,
                limit,
                offset,
            } => {
                assert_eq!(search.as_deref(), Some("note"));
                assert_eq!(item_type.as_deref(), Some("TEXT"));
                assert_eq!(limit, Some(5));
                assert_eq!(offset, None);
            }
            _ => panic!("expected list command"),
        }
    }

    #[test]
    fn completion_script_is_generated_for_each_shell() {
        for shell in [Shell::Bash, Shell::Zsh, Shell::Fish, Shell::PowerShell] {
            let mut cmd = Cli::command();
            let bin_name = cmd.get_name().to_string();
            let mut out = Vec::new();
            clap_complete::generate(shell, &mut cmd, bin_name, &mut out);
            let script = String::from_utf8(out).unwrap();
            assert!(script.contains("stashkeep"), "{shell:?} script names the binary");
        }
    }

    #[test]
    fn cli_parses_completion_shell_argument() {
        let cli = Cli::try_parse_from(["stashkeep", "completion", "zsh"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Completion { shell: Shell::Zsh }
        ));
        assert!(Cli::try_parse_from(["stashkeep", "completion", "tcsh"]).is_err());
        assert!(Cli::try_parse_from(["stashkeep", "completion"]).is_err());
    }

    #[test]
    fn cli_accepts_globals_after_the_command() {
        let cli = Cli::try_parse_from([
            "stashkeep",
            "status",
            "--server",
            "https://other.example/api/v1",
        ])
        .unwrap();
        assert_eq!(cli.server.as_deref(), Some("https://other.example/api/v1"));
        assert!(matches!(cli.command, Command::Status));
    }
}
