//! Scripted console walkthrough of the chat state stack: backfill, live
//! events, reactions, a discontinuity with recovery, and avatar
//! management with persistence.

mod config;
mod logging;

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info};

use chirp_avatar::{
    AvatarCache, AvatarCacheConfig, AvatarNamespace, AvatarPatch, JsonFileAvatarStore,
};
use chirp_client::{
    ChatClient, DeleteMessageParams, InMemoryChatClient, ReactionParams, RoomFeed,
    RoomFeedOptions, SendMessageParams, SnapshotCallback, TimelineSnapshot, UpdateMessageParams,
};
use chirp_core::{ReactionKind, ReactionSummary};

use crate::config::ConsoleConfig;

#[tokio::main]
async fn main() {
    logging::init();

    let config = match ConsoleConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = run(config).await {
        eprintln!("Demo failed: {err}");
        std::process::exit(1);
    }
}

async fn run(config: ConsoleConfig) -> Result<(), Box<dyn Error>> {
    info!(
        room_id = %config.room_id,
        data_dir = %config.data_dir.display(),
        "starting chirp console demo"
    );

    let store = JsonFileAvatarStore::new(&config.data_dir);
    let mut avatars = AvatarCache::new(
        Box::new(store),
        AvatarCacheConfig {
            user_capacity: config.user_avatar_capacity,
            room_capacity: config.room_avatar_capacity,
        },
    );
    let listener = avatars.on_change(|change| {
        info!(
            namespace = change.namespace.as_str(),
            id = %change.id,
            display_name = %change.record.display_name,
            "avatar changed"
        );
    });
    avatars.get_or_create(AvatarNamespace::Room, &config.room_id, Some("General"));

    let client = InMemoryChatClient::new();
    let on_update: SnapshotCallback = Arc::new(|snapshot: TimelineSnapshot| {
        debug!(
            status = ?snapshot.status,
            messages = snapshot.messages.len(),
            "timeline snapshot published"
        );
    });
    let feed = RoomFeed::spawn(
        client.clone(),
        config.room_id.clone(),
        RoomFeedOptions {
            backfill_limit: config.backfill_limit,
            pending_limit: config.pending_limit,
        },
        on_update,
    );

    println!("== messages arrive ==");
    let room_id = config.room_id.as_str();
    let first = client
        .send_message(room_id, send("user:alice", "Deploy went out clean."))
        .await?;
    let second = client
        .send_message(room_id, send("user:bob", "Nice, dashboards look healthy too."))
        .await?;
    let third = client
        .send_message(room_id, send("user:alice", "ship it friday?"))
        .await?;
    avatars.get_or_create(AvatarNamespace::User, "user:alice", Some("Alice"));
    avatars.get_or_create(AvatarNamespace::User, "user:bob", Some("Bob"));
    settle().await;
    render(&feed.snapshot(), &mut avatars);

    println!("\n== reactions, an edit and a deletion ==");
    client
        .add_reaction(
            room_id,
            &first.serial,
            ReactionParams::new("user:bob", ReactionKind::Distinct, "👍"),
        )
        .await?;
    client
        .add_reaction(
            room_id,
            &first.serial,
            ReactionParams::new("user:carol", ReactionKind::Unique, "❤️"),
        )
        .await?;
    client
        .add_reaction(
            room_id,
            &second.serial,
            ReactionParams::new("user:alice", ReactionKind::Multiple, "🎉").with_count(3),
        )
        .await?;
    client
        .update_message(
            room_id,
            &third.serial,
            UpdateMessageParams {
                client_id: "user:alice".to_owned(),
                text: "Ship it Friday after standup.".to_owned(),
            },
        )
        .await?;
    client
        .delete_message(
            room_id,
            &second.serial,
            DeleteMessageParams {
                client_id: "user:bob".to_owned(),
            },
        )
        .await?;
    settle().await;
    render(&feed.snapshot(), &mut avatars);

    println!("\n== avatar updates propagate to listeners ==");
    avatars.set_patch(
        AvatarNamespace::User,
        "user:alice",
        AvatarPatch {
            display_name: Some("Alice L.".to_owned()),
            image_url: Some("https://cdn.example/alice.png".to_owned()),
            color: None,
            initials: None,
        },
    );

    println!("\n== the stream gaps and the room resynchronizes ==");
    client.emit_discontinuity(room_id, Some("transport reconnected".to_owned()));
    client
        .send_message(room_id, send("user:bob", "Back online, did we lose anything?"))
        .await?;
    settle().await;
    render(&feed.snapshot(), &mut avatars);

    println!("\n== avatar export / import round trip ==");
    let exported = avatars.export();
    avatars.clear_all();
    avatars.import(exported)?;
    println!(
        "restored {} user avatar(s) and {} room avatar(s)",
        avatars.len(AvatarNamespace::User),
        avatars.len(AvatarNamespace::Room)
    );

    avatars.remove_listener(listener);
    feed.shutdown().await;
    info!("chirp console demo finished");
    Ok(())
}

fn send(client_id: &str, text: &str) -> SendMessageParams {
    SendMessageParams {
        client_id: client_id.to_owned(),
        text: text.to_owned(),
    }
}

/// Give the feed worker a moment to drain broadcast events.
async fn settle() {
    sleep(Duration::from_millis(150)).await;
}

fn render(snapshot: &TimelineSnapshot, avatars: &mut AvatarCache) {
    println!(
        "-- {} message(s), status {:?} --",
        snapshot.messages.len(),
        snapshot.status
    );
    for message in &snapshot.messages {
        let avatar = avatars.get_or_create(AvatarNamespace::User, &message.client_id, None);
        let mut line = format!(
            "[{} {}] {}: {}",
            avatar.initials, avatar.color, avatar.display_name, message.text
        );
        if message.deleted {
            line.push_str(" (deleted)");
        } else if message.updated_at_ms.is_some() {
            line.push_str(" (edited)");
        }
        let reactions = render_reactions(&message.reactions);
        if !reactions.is_empty() {
            line.push_str("  ");
            line.push_str(&reactions);
        }
        println!("{line}");
    }
    if let Some(error) = &snapshot.last_error {
        println!("!! last error: {error}");
    }
}

fn render_reactions(summary: &ReactionSummary) -> String {
    let mut parts = Vec::new();
    for kind in ReactionKind::ALL {
        for (emoji, tally) in summary.tallies(kind) {
            parts.push(format!("{emoji}{}", tally.total));
        }
    }
    parts.join(" ")
}
