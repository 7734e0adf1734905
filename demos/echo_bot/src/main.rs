//! Echo Bot Example
//!
//! A small onebridge bot: logs every message and answers a few commands.
//!
//! ```text
//! /echo <text>  - echo text back (CQ codes kept, so images echo too)
//! /ping         - Pong!
//! /help         - this help
//! /info         - message info
//! ```
//!
//! # Usage
//!
//! ```bash
//! cargo run --package echo-bot -- --config demos/echo_bot/onebridge.toml
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use onebridge::prelude::*;
use serde_json::Value;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "echo-bot", about = "A simple onebridge echo bot")]
struct Args {
    /// Configuration file; searched in the working directory when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Configuration profile (development, production, ...).
    #[arg(short, long)]
    profile: Option<String>,
}

const HELP_TEXT: &str = "Echo Bot - Commands
/echo <text> - Echo text
/ping        - Pong!
/help        - This help
/info        - Message info";

/// Where to answer a message event.
fn reply_target(event: &EventFrame) -> Option<Target> {
    match event.str_field("message_type")? {
        "group" => event.i64_field("group_id").map(Target::Group),
        _ => event.i64_field("user_id").map(Target::User),
    }
}

fn nickname(event: &EventFrame) -> &str {
    event
        .get("sender")
        .and_then(|sender| sender.get("nickname"))
        .and_then(Value::as_str)
        .unwrap_or("Unknown")
}

async fn log_message(event: EventFrame, _bot: BoxedBot) -> Result<()> {
    let text = event.str_field("raw_message").unwrap_or_default();
    let user_id = event.i64_field("user_id").unwrap_or_default();
    match event.i64_field("group_id") {
        Some(group_id) => info!("[Group {}] {} ({}): {}", group_id, nickname(&event), user_id, text),
        None => info!("[Private] {} ({}): {}", nickname(&event), user_id, text),
    }
    Ok(())
}

async fn commands(event: EventFrame, bot: BoxedBot) -> Result<()> {
    let Some(target) = reply_target(&event) else {
        return Ok(());
    };
    let text = event.str_field("raw_message").unwrap_or_default().trim();
    let sender = MessageSender::new(bot, target);

    if let Some(content) = text.strip_prefix("/echo ") {
        // Already CQ-encoded by the implementation; send as is.
        sender.encoded(content);
    } else if text == "/ping" {
        sender.text("Pong! 🏓");
    } else if text == "/help" {
        sender.text(HELP_TEXT);
    } else if text == "/info" {
        let info_text = format!(
            "📋 Message Info\n• Type: {}\n• From: {} ({})\n• Message ID: {}",
            target.message_type(),
            nickname(&event),
            event.i64_field("user_id").unwrap_or_default(),
            event.i64_field("message_id").unwrap_or_default(),
        );
        sender.text(info_text);
    }
    Ok(())
}

async fn welcome(event: EventFrame, bot: BoxedBot) -> Result<()> {
    if event.str_field("notice_type") != Some("group_increase") {
        return Ok(());
    }
    let (Some(group_id), Some(user_id)) = (event.i64_field("group_id"), event.i64_field("user_id"))
    else {
        return Ok(());
    };

    let welcome = [
        Segment::new("at").with("qq", user_id.to_string()),
        Segment::text(" welcome! Send /help to see what I can do."),
    ];
    let send = MessageSender::new(bot, Target::Group(group_id)).raw(&welcome);

    // The reply arrives on the loop running this trigger; wait for it elsewhere.
    tokio::spawn(async move {
        match send.await {
            Ok(Ok(_)) => info!(group_id, user_id, "Welcomed new member"),
            Ok(Err(e)) => warn!(group_id, user_id, error = %e, "Welcome message failed"),
            Err(e) => warn!(group_id, user_id, error = %e, "Welcome task aborted"),
        }
    });
    Ok(())
}

async fn log_request(event: EventFrame, _bot: BoxedBot) -> Result<()> {
    warn!(
        request_type = event.str_field("request_type").unwrap_or("unknown"),
        user_id = event.i64_field("user_id").unwrap_or_default(),
        "Unhandled request, approve it from the implementation"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut builder = BridgeRuntime::builder();
    if let Some(path) = &args.config {
        builder = builder.config_file(path);
    }
    if let Some(profile) = &args.profile {
        builder = builder.profile(profile);
    }

    builder
        .build()?
        .on(EventCategory::Message, trigger_fn(log_message).named("logging"))
        .on(EventCategory::Message, trigger_fn(commands).named("commands"))
        .on(EventCategory::Notice, trigger_fn(welcome).named("welcome"))
        .on(EventCategory::Request, trigger_fn(log_request).named("requests"))
        .run()
        .await?;

    Ok(())
}
