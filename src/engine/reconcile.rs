//! Startup reconciliation: align a restored snapshot with the host's
//! current reality. Expressed entirely through ordinary mutation operations,
//! so no separate invariant logic exists here.

use std::collections::HashSet;

use crate::events::{LiveTab, TabEvent};
use crate::logging::{json_log, obj, v_u64};
use crate::tree::TabId;

use super::mutation::MutationEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileReport {
    /// Snapshot nodes whose backing tab is gone, detached.
    pub detached: usize,
    /// Live tabs absent from the snapshot, attached.
    pub attached: usize,
}

/// Reconcile the restored tree against a fresh enumeration of open tabs.
pub fn reconcile(engine: &mut MutationEngine, live: &[LiveTab]) -> ReconcileReport {
    let mut report = ReconcileReport::default();

    let live_tabs: HashSet<TabId> = live.iter().map(|t| t.tab).collect();
    let mut stale: Vec<TabId> = engine
        .state()
        .tab_index
        .keys()
        .copied()
        .filter(|t| !live_tabs.contains(t))
        .collect();
    stale.sort_unstable();
    for tab in stale {
        if engine.detach(tab) {
            report.detached += 1;
        }
    }

    for tab in live {
        if engine.state().tab_index.contains_key(&tab.tab) {
            continue;
        }
        // Not user-initiated, so a still-present opener is honored and the
        // tab lands under it per the link policy.
        let created = TabEvent::Created {
            tab: tab.tab,
            opener: tab.opener,
            url: tab.url.clone(),
            window: tab.window,
            user_initiated: false,
        };
        if engine.handle_event(&created) {
            report.attached += 1;
            if !tab.title.is_empty() {
                engine.handle_updated(tab.tab, Some(&tab.title), None);
            }
        }
    }

    json_log(
        "reconcile",
        obj(&[
            ("live", v_u64(live.len() as u64)),
            ("detached", v_u64(report.detached as u64)),
            ("attached", v_u64(report.attached as u64)),
        ]),
    );
    report
}
