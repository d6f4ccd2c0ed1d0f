use std::sync::Arc;

use wordbomb::core::game_manager::GameManager;
use wordbomb::core::player::PlayerProfile;
use wordbomb::events::GameEvent;
use wordbomb::sync::MemoryGateway;

/// Scripted self-play run against the in-memory gateway: three players
/// join, trade a few turns (including a rejected word), then two leave
/// mid-game so the last one standing wins. Useful as a smoke test and as
/// a worked example of the engine's operation surface.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wordbomb=info".into()),
        )
        .init();

    println!("💣 wordbomb demo starting...");

    let gateway = Arc::new(MemoryGateway::new());
    // Toy dictionary: any word of three or more letters counts. The
    // fragment-containment rule still applies.
    let oracle = Arc::new(|word: &str| word.len() >= 3);
    let mut manager = GameManager::new(gateway, oracle);

    let alice = PlayerProfile::new("alice", "Alice");
    let bob = PlayerProfile::new("bob", "Bob");
    let carol = PlayerProfile::new("carol", "Carol");

    let room = manager.create_room(&alice, "demo room")?;
    room.join(bob.clone()).await?;
    room.join(carol.clone()).await?;
    room.set_ready(bob.uid.as_str(), true).await?;
    room.set_ready(carol.uid.as_str(), true).await?;

    // Log the room's event stream until the game ends.
    let mut events = room.events();
    let logger = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match &event {
                GameEvent::GameEnded { winner_id } => {
                    tracing::info!(winner = %winner_id, "game over");
                    break;
                }
                other => tracing::info!(event = ?other, "observed"),
            }
        }
    });

    room.start(alice.uid.as_str()).await?;

    // A few clean turns: each holder types, then plays a word built
    // around the current fragment.
    for _ in 0..4 {
        let snapshot = room.snapshot().await?;
        let holder = snapshot.state.current_player_turn.clone();
        let word = format!("{}ing", snapshot.state.current_letters.to_lowercase());

        room.update_typing(holder.as_str(), word.as_str()).await?;
        room.submit(holder.as_str(), word.as_str()).await?;
    }

    // One rejected submission to show the shake path.
    let snapshot = room.snapshot().await?;
    let holder = snapshot.state.current_player_turn.clone();
    if room.submit(holder.as_str(), "zz").await.is_err() {
        tracing::info!(player = %holder, "word rejected as expected");
    }

    // Two departures leave a single survivor and end the game.
    let snapshot = room.snapshot().await?;
    let mut remaining: Vec<String> = snapshot
        .state
        .positions
        .keys()
        .cloned()
        .collect();
    remaining.sort();
    room.leave(remaining[0].as_str()).await?;
    room.leave(remaining[1].as_str()).await?;

    logger.await?;

    let final_snapshot = room.snapshot().await?;
    println!(
        "🏆 winner: {}",
        final_snapshot.state.winner.as_deref().unwrap_or("<none>")
    );

    let room_id = room.room_id().to_string();
    manager.close_room(&room_id).await;
    println!("👋 demo finished");
    Ok(())
}
