//! Command-line interface parsing and handling
//!
//! A thin interactive driver around [`ChatSession`]: each input line becomes
//! a turn, and the assembled transcript tail is printed once the turn
//! completes.

use std::error::Error;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::api::turn::HttpTurnInitiator;
use crate::channel::sse::SseEventChannel;
use crate::core::config::Config;
use crate::core::message::{Message, MessageKind};
use crate::core::session::{ChatSession, TurnContext};

#[derive(Parser)]
#[command(name = "turnstream")]
#[command(about = "Streams assistant turns from a console backend and prints the assembled transcript")]
pub struct Args {
    /// Base URL of the assistant API (overrides the config file)
    #[arg(long, value_name = "URL")]
    pub base_url: Option<String>,

    /// Organization scope forwarded with each turn
    #[arg(long, value_name = "ORG_ID")]
    pub org: Option<String>,

    /// Id of the entity the conversation is about
    #[arg(long, value_name = "ENTITY_ID")]
    pub entity_id: Option<String>,

    /// Type of the entity the conversation is about
    #[arg(long, value_name = "ENTITY_TYPE")]
    pub entity_type: Option<String>,

    /// Send a single message and exit instead of reading from stdin
    pub message: Option<String>,
}

pub async fn run() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::load()?;
    let base_url = args
        .base_url
        .unwrap_or_else(|| config.base_url().to_string());

    let client = reqwest::Client::new();
    let initiator = Arc::new(HttpTurnInitiator::new(client.clone(), base_url.clone()));
    let channel = Arc::new(SseEventChannel::new(client, base_url));
    let context = TurnContext {
        org_id: args.org.or(config.org_id),
        current_entity_id: args.entity_id,
        current_entity_type: args.entity_type,
    };
    let mut session = ChatSession::with_context(initiator, channel, context);

    if let Some(message) = args.message {
        run_turn(&mut session, &message).await;
        return Ok(());
    }

    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed == "/reset" {
            session.reset();
            println!("(conversation cleared)");
            continue;
        }
        run_turn(&mut session, trimmed).await;
    }
    Ok(())
}

async fn run_turn(session: &mut ChatSession, text: &str) {
    let before = session.messages().len();
    if let Err(err) = session.send_message(text).await {
        eprintln!("error: {err}");
        return;
    }
    session.run_turn().await;

    for message in &session.messages()[before..] {
        if message.is_assistant() {
            print_message(message);
        }
    }
    if let Some(error) = session.error() {
        eprintln!("stream error: {error}");
    }
}

fn print_message(message: &Message) {
    match &message.kind {
        MessageKind::Plain => {
            if !message.content.is_empty() {
                println!("{}", message.content);
            }
            for citation in &message.citations {
                println!(
                    "  [{} {}] {}",
                    citation.entity_type, citation.entity_id, citation.display_name
                );
            }
        }
        MessageKind::MutationPending => {
            println!(
                "  ... change in progress ({})",
                message.tool_call_id.as_deref().unwrap_or("unknown")
            );
        }
        MessageKind::MutationPreview(preview) => {
            println!(
                "  proposed change to {} {}: {}",
                preview.entity.entity_type, preview.entity.entity_id, preview.description
            );
        }
        MessageKind::MutationError(text) => {
            println!("  change failed: {text}");
        }
    }
}
