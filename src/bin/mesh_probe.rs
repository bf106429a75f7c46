use std::env;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use meshcall::config::DEFAULT_SIGNALING_PORT;
use meshcall::mesh::loopback::{LoopbackBehavior, LoopbackMedia, LoopbackRenderer, LoopbackSessions};
use meshcall::mesh::{Collaborators, MeshCoordinator, SignalingClient};
use meshcall::signaling::RoomId;
use tokio::time::timeout;
use tracing_subscriber::EnvFilter;

const WRITER_DRAIN: Duration = Duration::from_secs(2);

// Usage: mesh_probe [url] [room]
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = env::args().skip(1);
    let url = args
        .next()
        .or_else(|| env::var("MESHCALL_URL").ok())
        .unwrap_or_else(|| format!("ws://127.0.0.1:{}", DEFAULT_SIGNALING_PORT));
    let room = args.next().unwrap_or_else(|| "lobby".to_string());

    println!("Probing {} in room {}", url, room);

    let client = SignalingClient::connect(&url).await?;
    let (outbound, inbound, writer) = client.into_channels();

    // Loopback sessions never carry real media, but they walk the whole
    // offer/answer/candidate exchange with whoever else is in the room.
    let collab = Collaborators {
        media: Arc::new(LoopbackMedia::new()),
        sessions: Arc::new(LoopbackSessions::new(LoopbackBehavior {
            candidates: 2,
            ..LoopbackBehavior::default()
        })),
        renderer: Arc::new(LoopbackRenderer::new()),
    };

    let mesh = MeshCoordinator::new(RoomId::from(room), collab, outbound);
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    mesh.run(inbound, shutdown).await?;

    // The coordinator held the last sender; let LeaveRoom and the close
    // frame reach the relay before the runtime goes away.
    if timeout(WRITER_DRAIN, writer).await.is_err() {
        eprintln!("Relay did not take the close frame in time");
    }

    println!("Probe finished");
    Ok(())
}
