use anyhow::Context;
use clap::{Parser, Subcommand};
use dispatch::api::{DispatcherClient, NotificationMethod, Topic, TopicApi};
use dispatch::conversation::{ConversationView, EngineStatus};
use dispatch::desk::{Desk, SourceFactory};
use dispatch::message::{Author, Message, MessageKind};
use dispatch::widget::{BridgeSource, EventSource};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "dispatch")]
#[command(about = "Dispatch CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config file.
    Init {
        /// Config file path (default: DISPATCH_CONFIG_PATH or ~/.dispatch/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// List the topics offered by the dispatcher.
    Topics {
        /// Config file path (default: DISPATCH_CONFIG_PATH or ~/.dispatch/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Chat about a topic; the transcript is forwarded when the bot ends the conversation.
    Chat {
        /// Config file path (default: DISPATCH_CONFIG_PATH or ~/.dispatch/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Topic name (as listed by `dispatch topics`).
        topic: String,
    },

    /// Forward a free-text description for a topic without chatting.
    Resolve {
        /// Config file path (default: DISPATCH_CONFIG_PATH or ~/.dispatch/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Topic name.
        topic: String,

        /// What needs resolving.
        description: String,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Version) => {
            println!("dispatch {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Init { config }) => run_init(config),
        Some(Commands::Topics { config }) => run_topics(config).await,
        Some(Commands::Chat { config, topic }) => run_chat(config, topic).await,
        Some(Commands::Resolve {
            config,
            topic,
            description,
        }) => run_resolve(config, topic, description).await,
        None => {
            println!("Run with --help for usage");
            Ok(())
        }
    };
    if let Err(e) = result {
        log::error!("{:#}", e);
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(dispatch::config::default_config_path);
    let dir = dispatch::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

/// Build a desk wired to the configured dispatcher and widget bridge.
fn build_desk(config_path: Option<PathBuf>) -> anyhow::Result<Arc<Desk>> {
    let (config, _) = dispatch::config::load_config(config_path)?;
    let api = DispatcherClient::new(Some(dispatch::config::resolve_api_base_url(&config)));
    let config_base_url = config.widget.config_base_url.clone();
    let bridge_url = dispatch::config::resolve_bridge_url(&config);
    log::debug!("dispatcher at {}, bridge at {}", api.base_url(), bridge_url);
    let factory: SourceFactory = Arc::new(move |_topic: &Topic| {
        Arc::new(BridgeSource::new(
            Some(config_base_url.clone()),
            bridge_url.clone(),
        )) as Arc<dyn EventSource>
    });
    Ok(Desk::new(Arc::new(api), factory))
}

fn method_label(method: &NotificationMethod) -> &str {
    match method {
        NotificationMethod::Email => "email",
        NotificationMethod::Slack => "slack",
        NotificationMethod::Telegram => "telegram",
        NotificationMethod::Other(s) => s,
    }
}

async fn run_topics(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let (config, _) = dispatch::config::load_config(config_path)?;
    let api = DispatcherClient::new(Some(dispatch::config::resolve_api_base_url(&config)));
    let topics = api
        .list_topics()
        .await
        .context("Failed to fetch topics. Please try again later.")?;
    if topics.is_empty() {
        println!("no topics available");
    }
    for t in topics {
        println!(
            "{} [{}] {}",
            t.name,
            method_label(&t.notification.method),
            t.description
        );
    }
    Ok(())
}

async fn run_resolve(
    config_path: Option<PathBuf>,
    topic: String,
    description: String,
) -> anyhow::Result<()> {
    let description = description.trim();
    if description.is_empty() {
        anyhow::bail!("description must not be empty");
    }
    let desk = build_desk(config_path)?;
    desk.resolve_manual(&topic, description).await?;
    println!("Successfully sent description for {}", topic);
    Ok(())
}

/// Terminal rendering state: what has been printed so far.
#[derive(Default)]
struct Screen {
    printed: HashMap<String, Message>,
    buttons: Vec<String>,
    typing: bool,
}

impl Screen {
    fn render(&mut self, view: &ConversationView) {
        for m in &view.messages {
            if self.printed.get(&m.key) == Some(m) {
                continue;
            }
            println!("{}", format_message(m));
            if m.kind == MessageKind::Dialog && !m.buttons.is_empty() {
                let options: Vec<String> = m
                    .buttons
                    .iter()
                    .enumerate()
                    .map(|(i, b)| format!("[/{}] {}", i + 1, b))
                    .collect();
                println!("    {}", options.join("  "));
                self.buttons = m.buttons.clone();
            }
            self.printed.insert(m.key.clone(), m.clone());
        }
        if view.is_typing && !self.typing {
            println!("Bot is typing...");
        }
        self.typing = view.is_typing;
    }

    /// `/N` picks the Nth button of the latest dialog.
    fn pick(&self, input: &str) -> Option<String> {
        let n: usize = input.strip_prefix('/')?.parse().ok()?;
        self.buttons.get(n.checked_sub(1)?).cloned()
    }
}

fn format_message(m: &Message) -> String {
    let time = chrono::DateTime::from_timestamp_millis(m.timestamp)
        .map(|t| t.with_timezone(&chrono::Local).format("%H:%M:%S").to_string())
        .unwrap_or_default();
    let who = match m.author {
        Author::Bot => "Bot",
        Author::User => "You",
    };
    let failed = if m.success { "" } else { " (not delivered)" };
    format!("{} {}: {}{}", time, who, m.text, failed)
}

async fn run_chat(config_path: Option<PathBuf>, topic_name: String) -> anyhow::Result<()> {
    let desk = build_desk(config_path)?;
    desk.load_topics()
        .await
        .context("Failed to fetch topics. Please try again later.")?;
    let topic = desk
        .find_topic(&topic_name)
        .await
        .ok_or_else(|| anyhow::anyhow!("unknown topic: {}", topic_name))?;
    let mut notices = desk.notices();

    println!("Chatting about {} (type /exit to leave)", topic.name);
    let engine = match desk.select(topic).await {
        Ok(engine) => engine,
        Err(e) => {
            if let Some((_, engine)) = desk.selected().await {
                if let EngineStatus::Errored(msg) = engine.view().await.status {
                    eprintln!("{}", msg);
                }
            }
            desk.deselect().await;
            return Err(e.into());
        }
    };

    let mut view = engine.watch();
    let mut screen = Screen::default();
    screen.render(&view.borrow_and_update().clone());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    desk.deselect().await;
                    break;
                };
                let input = line.trim();
                if input.eq_ignore_ascii_case("/exit") || input.eq_ignore_ascii_case("/quit") {
                    desk.deselect().await;
                    break;
                }
                let text = screen.pick(input).unwrap_or_else(|| input.to_string());
                if let Err(e) = engine.send(&text).await {
                    eprintln!("chat error: {}", e);
                }
            }
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = view.borrow_and_update().clone();
                screen.render(&current);
                if current.status == EngineStatus::Stopped {
                    if let Ok(notice) = notices.try_recv() {
                        println!("{}", notice);
                    }
                    break;
                }
            }
            notice = notices.recv() => {
                if let Ok(notice) = notice {
                    println!("{}", notice);
                    break;
                }
            }
        }
    }
    Ok(())
}
