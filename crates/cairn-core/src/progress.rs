//! The progress gate: sequential entry into milestones.
//!
//! Milestone 0 is always open. Milestone i needs a completion marker for
//! every sub-item of milestone i-1 plus a recorded attempt on that
//! milestone's quiz. Attempts gate by presence alone; `passed` and `score`
//! are stored for display and never consulted here.

use cairn_db::models::{MilestoneOutline, ProgressRecord, quiz_key, task_key};

/// Why entry was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// A sub-item of the previous milestone has no completion marker.
    NeedMaterial,
    /// The previous milestone's quiz has no recorded attempt.
    NeedQuiz,
}

impl BlockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NeedMaterial => "need_material",
            Self::NeedQuiz => "need_quiz",
        }
    }
}

/// Where to send the learner when entry is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Redirect {
    pub milestone_index: u32,
    /// Set when the redirect points at one specific sub-item.
    pub sub_index: Option<u32>,
}

/// The gate's verdict for one entry request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryDecision {
    Ok,
    Blocked {
        reason: BlockReason,
        redirect: Redirect,
    },
}

impl EntryDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Decide whether a learner may enter `milestone_index`.
///
/// Sub-items are checked in order, so a refusal redirects to the first
/// incomplete one. An out-of-range index passes vacuously; surfaces reject
/// the index itself before consulting the gate.
pub fn can_enter(
    milestone_index: u32,
    progress: &ProgressRecord,
    milestones: &[MilestoneOutline],
) -> EntryDecision {
    if milestone_index == 0 {
        return EntryDecision::Ok;
    }
    let prev = milestone_index - 1;
    let Some(outline) = milestones.get(prev as usize) else {
        return EntryDecision::Ok;
    };

    for sub_index in 0..outline.sub_items.len() as u32 {
        if !progress.completed_tasks.contains_key(&task_key(prev, sub_index)) {
            return EntryDecision::Blocked {
                reason: BlockReason::NeedMaterial,
                redirect: Redirect {
                    milestone_index: prev,
                    sub_index: Some(sub_index),
                },
            };
        }
    }

    if !progress.completed_tasks.contains_key(&quiz_key(prev)) {
        return EntryDecision::Blocked {
            reason: BlockReason::NeedQuiz,
            redirect: Redirect {
                milestone_index: prev,
                sub_index: None,
            },
        };
    }

    EntryDecision::Ok
}

/// Percentage of sub-items with completion markers, across all milestones.
///
/// Quiz attempts do not feed the percentage; it tracks reading progress.
/// Counting walks the outline rather than the marker map, so stale keys from
/// removed milestones never inflate the result.
pub fn recompute_percent(progress: &ProgressRecord, milestones: &[MilestoneOutline]) -> f64 {
    let total: usize = milestones.iter().map(|m| m.sub_items.len()).sum();
    if total == 0 {
        return 0.0;
    }
    let mut done = 0usize;
    for (milestone_index, outline) in milestones.iter().enumerate() {
        for sub_index in 0..outline.sub_items.len() as u32 {
            if progress
                .completed_tasks
                .contains_key(&task_key(milestone_index as u32, sub_index))
            {
                done += 1;
            }
        }
    }
    done as f64 / total as f64 * 100.0
}
