//! skein-node: one site of a skein editing mesh.
//!
//! ```text
//! skein-node [CONFIG.toml | -] [PEER]
//! ```
//!
//! Starts a new mesh, or joins the one `PEER` (a `ws://` URL) belongs to, and
//! reads edit commands from stdin.

mod console;

use anyhow::Context;
use log::{error, info};
use skein_mesh::{MeshConfig, NodeHandle};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::console::{ConsoleCommand, ConsoleView, HELP};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let config = match args.next().filter(|path| path != "-") {
        Some(path) => MeshConfig::load(&path).with_context(|| format!("loading {path}"))?,
        None => MeshConfig::default(),
    };
    let target = args.next();

    let (node, task) = skein_mesh::spawn(config, ConsoleView, ConsoleView, target)
        .await
        .context("starting node")?;
    info!("site {} reachable at {}", node.site_id(), node.peer_id());
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match console::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("!! {e}");
                continue;
            }
        };
        if command == ConsoleCommand::Quit {
            break;
        }
        if let Err(e) = run_command(&node, command).await {
            error!("{e}");
            if matches!(e, skein_mesh::MeshError::Shutdown) {
                break;
            }
        }
    }

    node.shutdown().await.ok();
    task.await.context("node task panicked")?;
    Ok(())
}

async fn run_command(node: &NodeHandle, command: ConsoleCommand) -> Result<(), skein_mesh::MeshError> {
    match command {
        ConsoleCommand::Insert { at, text } => node.insert(text, at).await?,
        ConsoleCommand::Delete { start, end } => node.delete(start, end).await?,
        ConsoleCommand::Connect(peer) => node.connect(peer).await?,
        ConsoleCommand::Text => {
            let text = node.text().await?;
            println!("---\n{text}\n---");
        }
        ConsoleCommand::Peers => {
            for member in node.members().await? {
                let me = if &member.peer_id == node.peer_id() { " (me)" } else { "" };
                println!("{} {}{me}", member.site_id, member.peer_id);
            }
        }
        ConsoleCommand::Help => println!("{HELP}"),
        ConsoleCommand::Quit => {}
    }
    Ok(())
}
