//! Command: list shared files and their link state on this machine.
use std::sync::Arc;

use anyhow::{Context as _, Result};

use super::{CommandSetup, emit};
use crate::cli::{GlobalOpts, ListOpts};
use crate::engine::{FileStatus, LinkHealth};
use crate::logging::Logger;

/// Run the list command.
///
/// # Errors
///
/// Returns an error if the state cannot be read or JSON output fails.
pub fn run(global: &GlobalOpts, opts: &ListOpts, log: &Arc<Logger>) -> Result<()> {
    let setup = CommandSetup::init(global, log)?;
    let rows = setup.engine.list();

    if opts.json {
        let json = serde_json::to_string_pretty(&rows).context("cannot serialize file list")?;
        emit(&json);
        return Ok(());
    }

    let config = setup.engine.config();
    if config.initialized {
        log.info(&format!(
            "{} syncing {} with {}",
            config.name,
            config.path.display(),
            config.remote
        ));
    } else {
        log.warn("not initialized; run `configsync init` first");
    }
    emit(&render(&rows));
    Ok(())
}

const fn label(health: LinkHealth) -> &'static str {
    match health {
        LinkHealth::Linked => "linked",
        LinkHealth::Broken => "broken",
        LinkHealth::Missing => "missing",
        LinkHealth::NotLinked => "not linked",
        LinkHealth::Orphaned => "orphaned",
    }
}

/// Render `rows` as an aligned table.
#[must_use]
pub fn render(rows: &[FileStatus]) -> String {
    if rows.is_empty() {
        return "no shared files".to_string();
    }

    let cells: Vec<[String; 5]> = std::iter::once(
        ["FILE", "LOCAL", "OWNER", "LINKS", "STATE"].map(str::to_string),
    )
    .chain(rows.iter().map(|row| {
        [
            row.key.clone(),
            row.local
                .as_ref()
                .map_or_else(|| "-".to_string(), |p| p.display().to_string()),
            row.owner.clone().unwrap_or_else(|| "-".to_string()),
            row.links.to_string(),
            label(row.health).to_string(),
        ]
    }))
    .collect();

    let mut widths = [0usize; 4];
    for row in &cells {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }
    let [file_w, local_w, owner_w, links_w] = widths;

    cells
        .iter()
        .map(|[file, local, owner, links, state]| {
            format!("{file:<file_w$}  {local:<local_w$}  {owner:<owner_w$}  {links:>links_w$}  {state}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}
