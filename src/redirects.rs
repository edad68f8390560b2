use crate::config::{ARTICLES_TABLE, PROGRESS_INTERVAL};
use crate::index::WikiIndex;
use crate::stats::IngestStats;
use crate::store::{Connector, ResilientStore, StoreError};
use indicatif::ProgressBar;
use tracing::{debug, info};

/// Second pass: writes one article row per alias whose target resolves.
///
/// Aliases that do not resolve (target never loaded, cycle, chain too deep) are
/// dropped and only counted. Runs after every record has been merged into `index`.
pub fn resolve_redirects<C: Connector>(
    index: &WikiIndex,
    store: &mut ResilientStore<C>,
    stats: &IngestStats,
) -> Result<(), StoreError> {
    let pb = ProgressBar::new_spinner();
    let (_, redirect_count, _) = index.stats();

    info!(redirects = redirect_count, "Resolving redirects");

    for (n, (alias, edge)) in index.redirects().enumerate() {
        match index.resolve(alias) {
            Some(body_id) => {
                let inserted = store.insert(
                    ARTICLES_TABLE,
                    &[
                        ("title", alias.into()),
                        ("body", body_id.into()),
                        ("aid", edge.source_id.into()),
                    ],
                    Some("id"),
                    true,
                )?;
                if inserted.is_some() {
                    stats.inc_resolved();
                }
            }
            None => {
                debug!(alias, target = %edge.target, "Unresolvable redirect dropped");
                stats.inc_dropped();
            }
        }

        if (n as u64 + 1) % PROGRESS_INTERVAL == 0 {
            pb.tick();
        }
    }

    store.commit()?;
    pb.finish_and_clear();

    info!(
        resolved = stats.resolved(),
        dropped = stats.dropped(),
        "Redirect resolution complete"
    );

    Ok(())
}
