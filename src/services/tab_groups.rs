//! Window enumeration and native tab-group collapsing.
//!
//! Native tabbed windows show up as separate OS windows that share one frame, because only
//! the selected tab renders. Streaming each of them would duplicate the same on-screen area,
//! so each tab group is collapsed into a single representative window.

use crate::config::Config;
use crate::error::Result;
use crate::events::{WindowId, WindowInfo, WindowMetadata};
use crate::services::window_system::WindowSystem;
use smallvec::SmallVec;
use std::collections::HashMap;
use tracing::debug;

/// Default frame tolerance for tab-group detection, in screen units.
pub const DEFAULT_TAB_TOLERANCE: f64 = 5.0;

/// Stacking layer of ordinary application windows.
pub const NORMAL_WINDOW_LAYER: i32 = 0;

/// Keeps windows that can be streamed: normal layer, at least the minimum size, and owned by
/// a known application.
pub fn capturable_windows(
    windows: Vec<WindowInfo>,
    min_width: f64,
    min_height: f64,
) -> Vec<WindowInfo> {
    windows
        .into_iter()
        .filter(|window| {
            window.layer == NORMAL_WINDOW_LAYER
                && window.frame.width >= min_width
                && window.frame.height >= min_height
                && window.application.is_some()
        })
        .collect()
}

fn resolved_on_screen(window: &WindowInfo, metadata: &HashMap<WindowId, WindowMetadata>) -> bool {
    metadata
        .get(&window.id)
        .map_or(window.is_on_screen, |meta| meta.is_on_screen)
}

/// Groups windows by owning process, keeping first-seen order. Windows without an owner are
/// dropped here.
fn group_by_process(windows: Vec<WindowInfo>) -> Vec<Vec<WindowInfo>> {
    let mut index: HashMap<u32, usize> = HashMap::new();
    let mut groups: Vec<Vec<WindowInfo>> = Vec::new();

    for window in windows {
        let Some(pid) = window.owner_pid() else {
            continue;
        };
        match index.get(&pid) {
            Some(&slot) => groups[slot].push(window),
            None => {
                index.insert(pid, groups.len());
                groups.push(vec![window]);
            }
        }
    }

    groups
}

fn collapse_group(
    group: Vec<WindowInfo>,
    metadata: &HashMap<WindowId, WindowMetadata>,
    tolerance: f64,
) -> Vec<WindowInfo> {
    if group.len() < 2 {
        return group;
    }

    let mut assigned = vec![false; group.len()];
    let mut tab_counts: HashMap<usize, usize> = HashMap::new();

    for first in 0..group.len() {
        if assigned[first] {
            continue;
        }
        assigned[first] = true;

        let mut members: SmallVec<[usize; 4]> = SmallVec::new();
        members.push(first);
        for other in (first + 1)..group.len() {
            let same_frame = group[first].frame.nearly_equals(&group[other].frame, tolerance);
            if !assigned[other] && same_frame {
                assigned[other] = true;
                members.push(other);
            }
        }

        let representative = members
            .iter()
            .copied()
            .find(|&member| resolved_on_screen(&group[member], metadata))
            .unwrap_or(first);

        if members.len() > 1 {
            debug!(
                "Collapsed {} tabs into window {}",
                members.len(),
                group[representative].id
            );
        }
        tab_counts.insert(representative, members.len());
    }

    group
        .into_iter()
        .enumerate()
        .filter_map(|(position, mut window)| {
            let count = tab_counts.get(&position)?;
            window.tab_count = *count;
            Some(window)
        })
        .collect()
}

/// Keeps only the visible windows of one application, or a single representative when none
/// is visible (the application is assumed to be minimized).
fn visible_members(
    group: Vec<WindowInfo>,
    metadata: &HashMap<WindowId, WindowMetadata>,
) -> Vec<WindowInfo> {
    if group.iter().any(|window| resolved_on_screen(window, metadata)) {
        group
            .into_iter()
            .filter(|window| resolved_on_screen(window, metadata))
            .collect()
    } else {
        group.into_iter().take(1).collect()
    }
}

/// Collapses native tab groups and hides obscured siblings.
///
/// Windows of one process whose frames are nearly identical (every component within
/// `tolerance`) form a tab group. Each group is replaced by one member, preferring an
/// on-screen one, stamped with the group size as `tab_count`.
pub fn collapse_tab_groups(
    windows: Vec<WindowInfo>,
    metadata: &HashMap<WindowId, WindowMetadata>,
    tolerance: f64,
) -> Vec<WindowInfo> {
    let collapsed: Vec<WindowInfo> = group_by_process(windows)
        .into_iter()
        .flat_map(|group| collapse_group(group, metadata, tolerance))
        .collect();

    group_by_process(collapsed)
        .into_iter()
        .flat_map(|group| visible_members(group, metadata))
        .collect()
}

/// Lists the windows a client may pick for streaming.
pub async fn enumerate_windows(
    window_system: &dyn WindowSystem,
    config: &Config,
) -> Result<Vec<WindowInfo>> {
    let snapshot = window_system.snapshot().await?;
    let candidates = capturable_windows(
        snapshot,
        config.monitor.min_window_width,
        config.monitor.min_window_height,
    );

    let ids: Vec<WindowId> = candidates.iter().map(|window| window.id).collect();
    let metadata = window_system.window_metadata(&ids).await?;

    Ok(collapse_tab_groups(
        candidates,
        &metadata,
        config.capture.tab_frame_tolerance,
    ))
}
