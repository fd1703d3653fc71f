//! Per-(student, offering) grade lifecycle.
//!
//! `NoMarks -> MarksOpen -> MarksLocked -> Computed -> Approved -> Published`
//!
//! A pair with no record is `NoMarks`. Every other state is one
//! [`GradeRecord`] whose [`Stage`] carries the payload of each stage it has
//! passed through, so a later stage cannot exist without the earlier ones.
//! [`apply`] is the only place transitions are decided.

use crate::error::{WorkflowError, WorkflowResult};
use crate::grading::{ComponentMarks, LetterGrade, Phase};
use chrono::{DateTime, Utc};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamp {
    pub by: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Computation {
    pub grade: LetterGrade,
    pub stamp: Stamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    MarksOpen,
    MarksLocked {
        locked: Stamp,
    },
    Computed {
        locked: Stamp,
        computed: Computation,
    },
    Approved {
        locked: Stamp,
        computed: Computation,
        approved: Stamp,
    },
    Published {
        locked: Stamp,
        computed: Computation,
        approved: Stamp,
        published: Stamp,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StageKind {
    MarksOpen,
    MarksLocked,
    Computed,
    Approved,
    Published,
}

impl StageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MarksOpen => "marks_open",
            Self::MarksLocked => "marks_locked",
            Self::Computed => "computed",
            Self::Approved => "approved",
            Self::Published => "published",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "marks_open" => Some(Self::MarksOpen),
            "marks_locked" => Some(Self::MarksLocked),
            "computed" => Some(Self::Computed),
            "approved" => Some(Self::Approved),
            "published" => Some(Self::Published),
            _ => None,
        }
    }
}

impl Stage {
    pub fn kind(&self) -> StageKind {
        match self {
            Self::MarksOpen => StageKind::MarksOpen,
            Self::MarksLocked { .. } => StageKind::MarksLocked,
            Self::Computed { .. } => StageKind::Computed,
            Self::Approved { .. } => StageKind::Approved,
            Self::Published { .. } => StageKind::Published,
        }
    }

    pub fn locked(&self) -> Option<&Stamp> {
        match self {
            Self::MarksOpen => None,
            Self::MarksLocked { locked }
            | Self::Computed { locked, .. }
            | Self::Approved { locked, .. }
            | Self::Published { locked, .. } => Some(locked),
        }
    }

    pub fn computed(&self) -> Option<&Computation> {
        match self {
            Self::MarksOpen | Self::MarksLocked { .. } => None,
            Self::Computed { computed, .. }
            | Self::Approved { computed, .. }
            | Self::Published { computed, .. } => Some(computed),
        }
    }

    pub fn approved(&self) -> Option<&Stamp> {
        match self {
            Self::Approved { approved, .. } | Self::Published { approved, .. } => Some(approved),
            _ => None,
        }
    }

    pub fn published(&self) -> Option<&Stamp> {
        match self {
            Self::Published { published, .. } => Some(published),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GradeRecord {
    pub student_id: String,
    pub offering_id: String,
    pub marks: ComponentMarks,
    pub submitted_by: String,
    pub stage: Stage,
    pub updated_at: DateTime<Utc>,
}

impl GradeRecord {
    pub fn is_locked(&self) -> bool {
        self.stage.kind() >= StageKind::MarksLocked
    }

    pub fn is_frozen(&self) -> bool {
        self.stage.kind() == StageKind::Published
    }

    /// Compact before/after image for the audit trail.
    pub fn snapshot(&self) -> serde_json::Value {
        json!({
            "stage": self.stage.kind().as_str(),
            "marks": self.marks,
            "grade": self.stage.computed().map(|c| c.grade.as_str()),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    RecordMark { phase: Phase, value: f64 },
    Lock,
    Compute { grade: LetterGrade },
    Approve,
    Publish,
}

impl Transition {
    pub fn action(&self) -> &'static str {
        match self {
            Self::RecordMark { .. } => "marks.record",
            Self::Lock => "marks.lock",
            Self::Compute { .. } => "grade.compute",
            Self::Approve => "grade.approve",
            Self::Publish => "grade.publish",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Changed(GradeRecord),
    /// The record already sits at or past the transition's target.
    Unchanged,
}

/// Decides one transition. `current` is the persisted record, if any.
pub fn apply(
    current: Option<&GradeRecord>,
    student_id: &str,
    offering_id: &str,
    transition: &Transition,
    actor_id: &str,
    now: DateTime<Utc>,
) -> WorkflowResult<Applied> {
    if current.map(|r| r.is_frozen()).unwrap_or(false) {
        return Err(WorkflowError::AlreadyFrozen);
    }
    let stamp = || Stamp {
        by: actor_id.to_string(),
        at: now,
    };

    let Some(record) = current else {
        return match transition {
            Transition::RecordMark { phase, value } => {
                let mut marks = ComponentMarks::default();
                marks.set(*phase, *value);
                Ok(Applied::Changed(GradeRecord {
                    student_id: student_id.to_string(),
                    offering_id: offering_id.to_string(),
                    marks,
                    submitted_by: actor_id.to_string(),
                    stage: Stage::MarksOpen,
                    updated_at: now,
                }))
            }
            Transition::Lock => Err(WorkflowError::PreconditionNotMet(
                "no marks entered".to_string(),
            )),
            Transition::Compute { .. } => Err(WorkflowError::PreconditionNotMet(
                "marks not submitted".to_string(),
            )),
            Transition::Approve => Err(WorkflowError::PreconditionNotMet(
                "grade not computed".to_string(),
            )),
            Transition::Publish => Err(WorkflowError::PreconditionNotMet(
                "grade not approved".to_string(),
            )),
        };
    };

    let mut next = record.clone();
    next.updated_at = now;

    next.stage = match (transition, &record.stage) {
        (Transition::RecordMark { phase, value }, Stage::MarksOpen) => {
            next.marks.set(*phase, *value);
            Stage::MarksOpen
        }
        (Transition::RecordMark { .. }, _) => return Err(WorkflowError::AlreadyLocked),

        (Transition::Lock, Stage::MarksOpen) => Stage::MarksLocked { locked: stamp() },
        (Transition::Lock, _) => return Ok(Applied::Unchanged),

        (Transition::Compute { .. }, Stage::MarksOpen) => {
            return Err(WorkflowError::PreconditionNotMet(
                "marks not submitted".to_string(),
            ))
        }
        (Transition::Compute { grade }, Stage::MarksLocked { locked }) => Stage::Computed {
            locked: locked.clone(),
            computed: Computation {
                grade: *grade,
                stamp: stamp(),
            },
        },
        (Transition::Compute { .. }, _) => return Ok(Applied::Unchanged),

        (Transition::Approve, Stage::MarksOpen | Stage::MarksLocked { .. }) => {
            return Err(WorkflowError::PreconditionNotMet(
                "grade not computed".to_string(),
            ))
        }
        (Transition::Approve, Stage::Computed { locked, computed }) => Stage::Approved {
            locked: locked.clone(),
            computed: computed.clone(),
            approved: stamp(),
        },
        (Transition::Approve, _) => return Ok(Applied::Unchanged),

        (
            Transition::Publish,
            Stage::Approved {
                locked,
                computed,
                approved,
            },
        ) => Stage::Published {
            locked: locked.clone(),
            computed: computed.clone(),
            approved: approved.clone(),
            published: stamp(),
        },
        (Transition::Publish, _) => {
            return Err(WorkflowError::PreconditionNotMet(
                "grade not approved".to_string(),
            ))
        }
    };

    Ok(Applied::Changed(next))
}
