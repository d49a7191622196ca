//! Dump the persisted forest as an indented, depth-annotated projection.
//! Usage: inspect [path-to-sqlite]

use anyhow::Result;

use tabforest::projection;
use tabforest::storage::SnapshotStore;

fn main() -> Result<()> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("SQLITE_PATH").ok())
        .unwrap_or_else(|| "./tabforest.sqlite".to_string());
    let mut store = SnapshotStore::open(&path)?;
    store.init()?;
    let Some(snap) = store.load()? else {
        println!("no snapshot in {}", path);
        return Ok(());
    };
    let state = snap.restore();
    for (wid, ctx) in &state.windows {
        println!("window {}", wid);
        for vid in &ctx.views {
            let view = &state.views[vid];
            let marker = if *vid == ctx.active_view { "*" } else { " " };
            println!("{} view {} ({})", marker, vid, view.name);
            for entry in projection::flatten(&state, *vid) {
                let node = &state.nodes[&entry.node];
                let flags = format!(
                    "{}{}",
                    if node.is_group() { "G" } else { "-" },
                    if node.is_expanded { "e" } else { "c" },
                );
                let label = if node.title.is_empty() { &node.url } else { &node.title };
                let hidden = if entry.visible { "" } else { " (hidden)" };
                println!(
                    "   {}{} #{} tab={} {}{}",
                    "  ".repeat(entry.depth),
                    flags,
                    node.id,
                    node.backing_tab,
                    label,
                    hidden
                );
            }
        }
    }
    Ok(())
}
