//! Metrics engine: logged time, usage rate and efficiency over subtrees.
//!
//! # Invariants
//! - "Actual time" is the task's own `total_logged_ms` plus every strict
//!   descendant's.
//! - Usage rate is 0 before any time is logged and the 100 sentinel when
//!   time is logged without a positive estimate.
//! - Work efficiency weights by duration; zero-duration subtrees and
//!   unscored or open slices carry no weight.

use crate::engine::hierarchy::effective_estimated_time;
use crate::engine::store::TaskStore;
use crate::model::task::{Task, TaskId};
use std::collections::HashSet;

/// Usage rate reported when time is logged against no usable estimate.
pub const NO_ESTIMATE_USAGE_RATE: f64 = 100.0;

/// Color/label band for a usage rate.
///
/// Lower bounds are inclusive: 40 is `Normal`, 120 is `OverBudget`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsageBand {
    /// Below 40%.
    HighEfficiency,
    /// 40% to below 80%.
    Normal,
    /// 80% to below 120%.
    NearLimit,
    /// 120% to below 240%.
    OverBudget,
    /// 240% and above.
    SeverelyOver,
}

impl UsageBand {
    pub fn from_rate(rate: f64) -> Self {
        if rate < 40.0 {
            Self::HighEfficiency
        } else if rate < 80.0 {
            Self::Normal
        } else if rate < 120.0 {
            Self::NearLimit
        } else if rate < 240.0 {
            Self::OverBudget
        } else {
            Self::SeverelyOver
        }
    }

    /// Stable machine-readable label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HighEfficiency => "high_efficiency",
            Self::Normal => "normal",
            Self::NearLimit => "near_limit",
            Self::OverBudget => "over_budget",
            Self::SeverelyOver => "severely_over",
        }
    }
}

/// Status summary combining actual time, estimate and band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageStatus {
    NotStarted,
    NoEstimate,
    Band(UsageBand),
}

/// Sum of `total_logged_ms` over every strict descendant.
pub fn descendant_logged_ms(store: &TaskStore, task: &Task) -> i64 {
    let mut visited = HashSet::from([task.id]);
    descendant_logged_inner(store, task.id, &mut visited)
}

fn descendant_logged_inner(store: &TaskStore, id: TaskId, visited: &mut HashSet<TaskId>) -> i64 {
    let mut total = 0;
    for child in store.children(id) {
        if visited.insert(child.id) {
            total += child.total_logged_ms + descendant_logged_inner(store, child.id, visited);
        }
    }
    total
}

/// Own logged time plus all descendants'.
pub fn actual_time_ms(store: &TaskStore, task: &Task) -> i64 {
    task.total_logged_ms + descendant_logged_ms(store, task)
}

/// Actual time as a percentage of the effective estimate.
///
/// Unbounded above; severe overruns exceed 1000.
pub fn usage_rate(store: &TaskStore, task: &Task) -> f64 {
    let actual = actual_time_ms(store, task);
    if actual == 0 {
        return 0.0;
    }
    match effective_estimated_time(store, task) {
        Some(estimate) if estimate > 0 => actual as f64 / estimate as f64 * 100.0,
        _ => NO_ESTIMATE_USAGE_RATE,
    }
}

pub fn usage_band(store: &TaskStore, task: &Task) -> UsageBand {
    UsageBand::from_rate(usage_rate(store, task))
}

/// Whether the effective estimate exists and is positive.
pub fn has_estimated_time(store: &TaskStore, task: &Task) -> bool {
    effective_estimated_time(store, task).is_some_and(|estimate| estimate > 0)
}

pub fn usage_status(store: &TaskStore, task: &Task) -> UsageStatus {
    if actual_time_ms(store, task) == 0 {
        return UsageStatus::NotStarted;
    }
    if !has_estimated_time(store, task) {
        return UsageStatus::NoEstimate;
    }
    UsageStatus::Band(usage_band(store, task))
}

/// Effective estimate over actual time, as a percentage (higher is better).
///
/// 0 when there is no estimate or no logged time.
pub fn time_efficiency(store: &TaskStore, task: &Task) -> f64 {
    let Some(estimate) = effective_estimated_time(store, task) else {
        return 0.0;
    };
    let actual = actual_time_ms(store, task);
    if actual == 0 {
        return 0.0;
    }
    estimate as f64 / actual as f64 * 100.0
}

/// Duration-weighted average efficiency score (0..=5) over the subtree.
pub fn work_efficiency(store: &TaskStore, task: &Task) -> f64 {
    let mut visited = HashSet::new();
    work_efficiency_inner(store, task, &mut visited)
}

fn work_efficiency_inner(store: &TaskStore, task: &Task, visited: &mut HashSet<TaskId>) -> f64 {
    if !visited.insert(task.id) {
        return 0.0;
    }

    let mut weighted_sum = 0.0;
    let mut total_weight = 0.0;

    for (duration, score) in task.time_slices.iter().filter_map(|slice| {
        if slice.is_open() {
            None
        } else {
            slice.scored_duration()
        }
    }) {
        weighted_sum += duration as f64 * f64::from(score);
        total_weight += duration as f64;
    }

    for child in store.children(task.id) {
        if visited.contains(&child.id) {
            continue;
        }
        let child_efficiency = work_efficiency_inner(store, child, visited);
        let child_duration = actual_time_ms(store, child);
        if child_duration != 0 {
            weighted_sum += child_duration as f64 * child_efficiency;
            total_weight += child_duration as f64;
        }
    }

    if total_weight == 0.0 {
        0.0
    } else {
        weighted_sum / total_weight
    }
}

/// Logged over estimated time, capped at 1.0; 0 without a positive estimate.
pub fn project_utilization(logged_ms: i64, estimated_ms: i64) -> f64 {
    if estimated_ms <= 0 {
        return 0.0;
    }
    (logged_ms as f64 / estimated_ms as f64).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::time_slice::TimeSlice;
    use uuid::Uuid;

    const EPS: f64 = 1e-9;

    fn child_of(parent: &Task, title: &str) -> Task {
        let mut task = Task::new(parent.project_id, title);
        task.parent_id = Some(parent.id);
        task
    }

    fn closed_slice(task: &Task, start: i64, duration: i64, score: Option<u8>) -> TimeSlice {
        let mut slice = TimeSlice::open(task.id, start);
        slice.end_at = Some(start + duration);
        slice.duration_ms = Some(duration);
        slice.efficiency_score = score;
        slice
    }

    fn with_slices(mut task: Task, slices: Vec<TimeSlice>) -> Task {
        task.time_slices = slices;
        task.total_logged_ms = task.closed_slices_total_ms();
        task
    }

    #[test]
    fn estimate_and_usage_scenario_from_mixed_children() {
        let a = Task::new(Uuid::new_v4(), "A");
        let mut b = child_of(&a, "B");
        b.estimated_time_ms = Some(1_000);
        b.total_logged_ms = 500;
        let mut c = child_of(&a, "C");
        c.total_logged_ms = 2_000;
        let store = TaskStore::new(vec![a.clone(), b, c]);

        assert_eq!(effective_estimated_time(&store, &a), Some(1_000));
        assert_eq!(actual_time_ms(&store, &a), 2_500);
        assert!((usage_rate(&store, &a) - 250.0).abs() < EPS);
        assert_eq!(usage_band(&store, &a), UsageBand::SeverelyOver);
    }

    #[test]
    fn descendant_time_covers_all_levels_but_not_self() {
        let mut root = Task::new(Uuid::new_v4(), "root");
        root.total_logged_ms = 7;
        let mut child = child_of(&root, "child");
        child.total_logged_ms = 10;
        let mut grandchild = child_of(&child, "grandchild");
        grandchild.total_logged_ms = 100;
        let store = TaskStore::new(vec![root.clone(), child, grandchild]);

        assert_eq!(descendant_logged_ms(&store, &root), 110);
        assert_eq!(actual_time_ms(&store, &root), 117);
    }

    #[test]
    fn usage_rate_sentinels() {
        let mut idle = Task::new(Uuid::new_v4(), "idle");
        idle.estimated_time_ms = Some(1_000);
        let mut unestimated = Task::new(Uuid::new_v4(), "unestimated");
        unestimated.total_logged_ms = 42;
        let mut zero_estimate = Task::new(Uuid::new_v4(), "zero");
        zero_estimate.total_logged_ms = 42;
        zero_estimate.estimated_time_ms = Some(0);
        let store = TaskStore::new(vec![idle.clone(), unestimated.clone(), zero_estimate.clone()]);

        assert_eq!(usage_rate(&store, &idle), 0.0);
        assert_eq!(usage_rate(&store, &unestimated), 100.0);
        assert_eq!(usage_rate(&store, &zero_estimate), 100.0);
        assert_eq!(usage_status(&store, &idle), UsageStatus::NotStarted);
        assert_eq!(usage_status(&store, &unestimated), UsageStatus::NoEstimate);
        assert_eq!(time_efficiency(&store, &unestimated), 0.0);
    }

    #[test]
    fn usage_rate_can_exceed_one_thousand() {
        let mut task = Task::new(Uuid::new_v4(), "overrun");
        task.estimated_time_ms = Some(10);
        task.total_logged_ms = 1_500;
        let store = TaskStore::new(vec![task.clone()]);
        assert!((usage_rate(&store, &task) - 15_000.0).abs() < EPS);
    }

    #[test]
    fn band_boundaries_are_inclusive_on_the_low_end() {
        assert_eq!(UsageBand::from_rate(0.0), UsageBand::HighEfficiency);
        assert_eq!(UsageBand::from_rate(39.999), UsageBand::HighEfficiency);
        assert_eq!(UsageBand::from_rate(40.0), UsageBand::Normal);
        assert_eq!(UsageBand::from_rate(79.9), UsageBand::Normal);
        assert_eq!(UsageBand::from_rate(80.0), UsageBand::NearLimit);
        assert_eq!(UsageBand::from_rate(119.99), UsageBand::NearLimit);
        assert_eq!(UsageBand::from_rate(120.0), UsageBand::OverBudget);
        assert_eq!(UsageBand::from_rate(239.0), UsageBand::OverBudget);
        assert_eq!(UsageBand::from_rate(240.0), UsageBand::SeverelyOver);
    }

    #[test]
    fn time_efficiency_is_inverse_ratio() {
        let mut task = Task::new(Uuid::new_v4(), "t");
        task.estimated_time_ms = Some(3_000);
        task.total_logged_ms = 1_500;
        let store = TaskStore::new(vec![task.clone()]);
        assert!((time_efficiency(&store, &task) - 200.0).abs() < EPS);
    }

    #[test]
    fn single_slice_efficiency_is_its_score() {
        let task = Task::new(Uuid::new_v4(), "t");
        let slice = closed_slice(&task, 0, 90_000, Some(4));
        let task = with_slices(task, vec![slice]);
        let store = TaskStore::new(vec![task.clone()]);
        assert!((work_efficiency(&store, &task) - 4.0).abs() < EPS);
    }

    #[test]
    fn efficiency_ignores_open_and_unscored_slices() {
        let task = Task::new(Uuid::new_v4(), "t");
        let scored = closed_slice(&task, 0, 1_000, Some(2));
        let unscored = closed_slice(&task, 2_000, 5_000, None);
        let open = TimeSlice::open(task.id, 10_000);
        let task = with_slices(task, vec![scored, unscored, open]);
        let store = TaskStore::new(vec![task.clone()]);
        assert!((work_efficiency(&store, &task) - 2.0).abs() < EPS);
    }

    #[test]
    fn efficiency_weights_children_by_subtree_duration() {
        let parent = Task::new(Uuid::new_v4(), "parent");
        let own = closed_slice(&parent, 0, 1_000, Some(5));
        let parent = with_slices(parent, vec![own]);

        let child = child_of(&parent, "child");
        let child_slice = closed_slice(&child, 5_000, 3_000, Some(1));
        let child = with_slices(child, vec![child_slice]);

        let idle_child = child_of(&parent, "idle");
        let store = TaskStore::new(vec![parent.clone(), child, idle_child]);

        // (1000*5 + 3000*1) / 4000
        assert!((work_efficiency(&store, &parent) - 2.0).abs() < EPS);
    }

    #[test]
    fn zero_duration_child_does_not_change_average() {
        let parent = Task::new(Uuid::new_v4(), "parent");
        let own = closed_slice(&parent, 0, 2_000, Some(3));
        let parent = with_slices(parent, vec![own]);
        let empty_child = child_of(&parent, "empty");

        let alone = TaskStore::new(vec![parent.clone()]);
        let with_child = TaskStore::new(vec![parent.clone(), empty_child]);
        assert_eq!(
            work_efficiency(&alone, &parent),
            work_efficiency(&with_child, &parent)
        );
    }

    #[test]
    fn efficiency_is_zero_without_weight() {
        let task = Task::new(Uuid::new_v4(), "t");
        let store = TaskStore::new(vec![task.clone()]);
        assert_eq!(work_efficiency(&store, &task), 0.0);
    }

    #[test]
    fn utilization_caps_at_one() {
        assert_eq!(project_utilization(10, 0), 0.0);
        assert!((project_utilization(50, 100) - 0.5).abs() < EPS);
        assert_eq!(project_utilization(500, 100), 1.0);
    }
}
