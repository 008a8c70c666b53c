use chrono::{DateTime, NaiveDate, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use std::collections::BTreeMap;
use std::str::FromStr;
use utoipa::ToSchema;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    InProgress,
    Paused,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum TaskAction {
    Start,
    Pause,
    Resume,
    Complete,
}

#[derive(Debug, Display, PartialEq)]
pub enum LifecycleError {
    #[display(fmt = "Cannot {} a task that is {}", action, from)]
    InvalidTransition { from: TaskStatus, action: TaskAction },

    #[display(fmt = "Progress can only be updated while the task is in progress")]
    NotInProgress,

    #[display(fmt = "Progress must be between 0 and 100, got {}", _0)]
    InvalidProgress(i64),

    #[display(fmt = "Assignment {} belongs to another employee", _0)]
    ForeignAssignment(u64),
}

impl TaskStatus {
    /// The status reached by applying `action`, if the lifecycle allows it.
    pub fn apply(self, action: TaskAction) -> Result<TaskStatus, LifecycleError> {
        use TaskAction::*;
        use TaskStatus::*;

        match (self, action) {
            (Queued, Start) => Ok(InProgress),
            (InProgress, Pause) => Ok(Paused),
            (Paused, Resume) => Ok(InProgress),
            (InProgress, Complete) => Ok(Completed),
            (from, action) => Err(LifecycleError::InvalidTransition { from, action }),
        }
    }

    pub fn is_active(self) -> bool {
        self == TaskStatus::InProgress
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DailyTarget {
    #[schema(example = 120.0)]
    pub quantity: Option<f64>,
    #[schema(example = "m2")]
    pub unit: Option<String>,
    #[schema(example = "Plaster east wall, level 3")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PauseEntry {
    #[schema(value_type = String, format = "date-time")]
    pub paused_at: DateTime<Utc>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub resumed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct WorkerTaskAssignment {
    pub id: u64,
    pub employee_id: u64,
    pub project_id: u64,
    pub task_id: u64,
    pub task_name: String,
    #[schema(value_type = String, format = "date")]
    pub work_date: NaiveDate,
    pub status: TaskStatus,
    pub daily_target: DailyTarget,
    pub progress_percent: u8,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub start_time: Option<DateTime<Utc>>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub completed_at: Option<DateTime<Utc>>,
    pub pause_history: Vec<PauseEntry>,
    pub supervisor_id: Option<u64>,
}

impl WorkerTaskAssignment {
    /// Apply a single transition to this assignment, updating timestamps and
    /// pause history.
    pub fn transition(&mut self, action: TaskAction, at: DateTime<Utc>) -> Result<(), LifecycleError> {
        let next = self.status.apply(action)?;

        match action {
            TaskAction::Start => {
                self.start_time = Some(at);
            }
            TaskAction::Pause => {
                self.pause_history.push(PauseEntry {
                    paused_at: at,
                    resumed_at: None,
                });
            }
            TaskAction::Resume => {
                if let Some(open) = self
                    .pause_history
                    .iter_mut()
                    .rev()
                    .find(|p| p.resumed_at.is_none())
                {
                    open.resumed_at = Some(at);
                }
            }
            TaskAction::Complete => {
                self.progress_percent = 100;
                self.completed_at = Some(at);
            }
        }

        self.status = next;
        Ok(())
    }

    pub fn set_progress(&mut self, percent: i64) -> Result<(), LifecycleError> {
        if !self.status.is_active() {
            return Err(LifecycleError::NotInProgress);
        }
        let percent = u8::try_from(percent)
            .ok()
            .filter(|p| *p <= 100)
            .ok_or(LifecycleError::InvalidProgress(percent))?;
        self.progress_percent = percent;
        Ok(())
    }
}

/// Start or resume `target`, first pausing every other in-progress assignment
/// of the same employee. Returns the ids of the assignments that were paused.
///
/// `others` may contain assignments of other employees; those are left alone.
pub fn activate(
    target: &mut WorkerTaskAssignment,
    others: &mut [WorkerTaskAssignment],
    action: TaskAction,
    at: DateTime<Utc>,
) -> Result<Vec<u64>, LifecycleError> {
    // validate before touching anything else
    target.status.apply(action)?;

    let mut paused = Vec::new();
    for other in others
        .iter_mut()
        .filter(|o| o.id != target.id && o.employee_id == target.employee_id)
    {
        if other.status.is_active() {
            other.transition(TaskAction::Pause, at)?;
            paused.push(other.id);
        }
    }

    target.transition(action, at)?;
    Ok(paused)
}

/// An employee with more than one in-progress assignment.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ActiveTaskConflict {
    pub employee_id: u64,
    /// The assignment that stays in progress after a repair
    pub keep_assignment_id: u64,
    /// Assignments a repair would pause
    pub pause_assignment_ids: Vec<u64>,
}

/// Find violations of the single-active-task rule.
///
/// The assignment with the latest `start_time` is kept (ties broken by the
/// higher id, i.e. the most recently created row).
pub fn find_active_conflicts(assignments: &[WorkerTaskAssignment]) -> Vec<ActiveTaskConflict> {
    let mut by_employee: BTreeMap<u64, Vec<&WorkerTaskAssignment>> = BTreeMap::new();
    for a in assignments.iter().filter(|a| a.status.is_active()) {
        by_employee.entry(a.employee_id).or_default().push(a);
    }

    by_employee
        .into_iter()
        .filter(|(_, active)| active.len() > 1)
        .map(|(employee_id, mut active)| {
            active.sort_by_key(|a| (a.start_time, a.id));
            let keep = active.pop().map(|a| a.id).unwrap_or_default();
            let mut pause_assignment_ids: Vec<u64> = active.iter().map(|a| a.id).collect();
            pause_assignment_ids.sort_unstable();
            ActiveTaskConflict {
                employee_id,
                keep_assignment_id: keep,
                pause_assignment_ids,
            }
        })
        .collect()
}

/// Database row; `status` and the JSON column are decoded by `TryFrom`.
#[derive(Debug, sqlx::FromRow)]
pub struct AssignmentRow {
    pub id: u64,
    pub employee_id: u64,
    pub project_id: u64,
    pub task_id: u64,
    pub task_name: String,
    pub work_date: NaiveDate,
    pub status: String,
    pub target_quantity: Option<f64>,
    pub target_unit: Option<String>,
    pub target_description: Option<String>,
    pub progress_percent: u8,
    pub start_time: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub pause_history: Json<Vec<PauseEntry>>,
    pub supervisor_id: Option<u64>,
}

pub const ASSIGNMENT_COLUMNS: &str = "id, employee_id, project_id, task_id, task_name, work_date, \
     status, target_quantity, target_unit, target_description, progress_percent, start_time, \
     completed_at, pause_history, supervisor_id";

impl TryFrom<AssignmentRow> for WorkerTaskAssignment {
    type Error = sqlx::Error;

    fn try_from(row: AssignmentRow) -> Result<Self, Self::Error> {
        let status = TaskStatus::from_str(&row.status).map_err(|e| sqlx::Error::ColumnDecode {
            index: "status".to_string(),
            source: Box::new(e),
        })?;

        Ok(WorkerTaskAssignment {
            id: row.id,
            employee_id: row.employee_id,
            project_id: row.project_id,
            task_id: row.task_id,
            task_name: row.task_name,
            work_date: row.work_date,
            status,
            daily_target: DailyTarget {
                quantity: row.target_quantity,
                unit: row.target_unit,
                description: row.target_description,
            },
            progress_percent: row.progress_percent,
            start_time: row.start_time,
            completed_at: row.completed_at,
            pause_history: row.pause_history.0,
            supervisor_id: row.supervisor_id,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    pub(crate) fn assignment(id: u64, employee_id: u64, status: TaskStatus) -> WorkerTaskAssignment {
        WorkerTaskAssignment {
            id,
            employee_id,
            project_id: 7,
            task_id: id * 10,
            task_name: format!("task {id}"),
            work_date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            status,
            daily_target: DailyTarget::default(),
            progress_percent: 0,
            start_time: None,
            completed_at: None,
            pause_history: Vec::new(),
            supervisor_id: Some(99),
        }
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, hour, 0, 0).unwrap()
    }

    fn active_count(all: &[&WorkerTaskAssignment], employee_id: u64) -> usize {
        all.iter()
            .filter(|a| a.employee_id == employee_id && a.status.is_active())
            .count()
    }

    #[test]
    fn allowed_transitions() {
        use TaskAction::*;
        use TaskStatus::*;
        assert_eq!(Queued.apply(Start), Ok(InProgress));
        assert_eq!(InProgress.apply(Pause), Ok(Paused));
        assert_eq!(Paused.apply(Resume), Ok(InProgress));
        assert_eq!(InProgress.apply(Complete), Ok(Completed));
    }

    #[test]
    fn rejected_transitions() {
        use TaskAction::*;
        use TaskStatus::*;
        for (from, action) in [
            (Queued, Pause),
            (Queued, Resume),
            (Queued, Complete),
            (InProgress, Start),
            (InProgress, Resume),
            (Paused, Start),
            (Paused, Pause),
            (Paused, Complete),
            (Completed, Start),
            (Completed, Resume),
        ] {
            assert_eq!(
                from.apply(action),
                Err(LifecycleError::InvalidTransition { from, action })
            );
        }
    }

    #[test]
    fn invalid_transition_message() {
        let err = TaskStatus::Completed.apply(TaskAction::Resume).unwrap_err();
        assert_eq!(err.to_string(), "Cannot resume a task that is completed");
    }

    #[test]
    fn status_round_trips_through_its_column_text() {
        assert_eq!(TaskStatus::InProgress.as_ref(), "in_progress");
        assert_eq!(TaskStatus::from_str("paused").unwrap(), TaskStatus::Paused);
        assert!(TaskStatus::from_str("cancelled").is_err());
    }

    #[test]
    fn pause_then_resume_records_history() {
        let mut a = assignment(1, 5, TaskStatus::Queued);
        a.transition(TaskAction::Start, at(8)).unwrap();
        a.transition(TaskAction::Pause, at(10)).unwrap();
        a.transition(TaskAction::Resume, at(11)).unwrap();

        assert_eq!(a.status, TaskStatus::InProgress);
        assert_eq!(a.start_time, Some(at(8)));
        assert_eq!(
            a.pause_history,
            vec![PauseEntry {
                paused_at: at(10),
                resumed_at: Some(at(11)),
            }]
        );
    }

    #[test]
    fn complete_sets_full_progress() {
        let mut a = assignment(1, 5, TaskStatus::InProgress);
        a.progress_percent = 40;
        a.transition(TaskAction::Complete, at(16)).unwrap();
        assert_eq!(a.progress_percent, 100);
        assert_eq!(a.completed_at, Some(at(16)));
    }

    #[test]
    fn starting_pauses_other_active_task_of_same_employee() {
        let mut target = assignment(1, 5, TaskStatus::Queued);
        let mut others = vec![
            assignment(2, 5, TaskStatus::InProgress),
            assignment(3, 5, TaskStatus::Paused),
            assignment(4, 6, TaskStatus::InProgress),
        ];

        let paused = activate(&mut target, &mut others, TaskAction::Start, at(9)).unwrap();

        assert_eq!(paused, vec![2]);
        assert_eq!(target.status, TaskStatus::InProgress);
        assert_eq!(others[0].status, TaskStatus::Paused);
        assert_eq!(others[0].pause_history.len(), 1);
        assert_eq!(others[1].status, TaskStatus::Paused);
        assert!(others[1].pause_history.is_empty());
        assert_eq!(others[2].status, TaskStatus::InProgress, "other employee untouched");
    }

    #[test]
    fn resuming_keeps_a_single_active_task() {
        let mut target = assignment(1, 5, TaskStatus::Paused);
        target.pause_history.push(PauseEntry {
            paused_at: at(9),
            resumed_at: None,
        });
        let mut others = vec![
            assignment(2, 5, TaskStatus::InProgress),
            assignment(3, 5, TaskStatus::InProgress),
        ];

        let paused = activate(&mut target, &mut others, TaskAction::Resume, at(12)).unwrap();

        assert_eq!(paused, vec![2, 3]);
        assert_eq!(target.status, TaskStatus::InProgress);
        assert_eq!(target.pause_history[0].resumed_at, Some(at(12)));

        let all: Vec<&WorkerTaskAssignment> = others.iter().chain(std::iter::once(&target)).collect();
        assert_eq!(active_count(&all, 5), 1);
    }

    #[test]
    fn failed_activation_changes_nothing() {
        let mut target = assignment(1, 5, TaskStatus::Completed);
        let mut others = vec![assignment(2, 5, TaskStatus::InProgress)];

        let err = activate(&mut target, &mut others, TaskAction::Start, at(9)).unwrap_err();

        assert!(matches!(err, LifecycleError::InvalidTransition { .. }));
        assert_eq!(others[0].status, TaskStatus::InProgress);
        assert!(others[0].pause_history.is_empty());
    }

    #[test]
    fn progress_only_while_in_progress() {
        let mut a = assignment(1, 5, TaskStatus::Paused);
        assert_eq!(a.set_progress(10), Err(LifecycleError::NotInProgress));

        a.status = TaskStatus::InProgress;
        assert_eq!(a.set_progress(101), Err(LifecycleError::InvalidProgress(101)));
        assert_eq!(a.set_progress(-1), Err(LifecycleError::InvalidProgress(-1)));
        a.set_progress(55).unwrap();
        assert_eq!(a.progress_percent, 55);
    }

    #[test]
    fn conflicts_keep_latest_started() {
        let base = at(7);
        let mut a = assignment(10, 5, TaskStatus::InProgress);
        a.start_time = Some(base + Duration::hours(2));
        let mut b = assignment(11, 5, TaskStatus::InProgress);
        b.start_time = Some(base);
        let mut c = assignment(12, 5, TaskStatus::InProgress);
        c.start_time = Some(base + Duration::hours(1));
        let single = assignment(20, 6, TaskStatus::InProgress);
        let paused = assignment(21, 6, TaskStatus::Paused);

        let conflicts = find_active_conflicts(&[a, b, c, single, paused]);

        assert_eq!(
            conflicts,
            vec![ActiveTaskConflict {
                employee_id: 5,
                keep_assignment_id: 10,
                pause_assignment_ids: vec![11, 12],
            }]
        );
    }

    #[test]
    fn conflicts_without_start_time_keep_newest_row() {
        let conflicts = find_active_conflicts(&[
            assignment(3, 8, TaskStatus::InProgress),
            assignment(4, 8, TaskStatus::InProgress),
        ]);
        assert_eq!(conflicts[0].keep_assignment_id, 4);
        assert_eq!(conflicts[0].pause_assignment_ids, vec![3]);
    }

    #[test]
    fn no_conflicts_when_rule_holds() {
        assert!(find_active_conflicts(&[
            assignment(1, 1, TaskStatus::InProgress),
            assignment(2, 2, TaskStatus::InProgress),
            assignment(3, 1, TaskStatus::Completed),
        ])
        .is_empty());
    }

    #[test]
    fn row_with_unknown_status_fails_to_decode() {
        let row = AssignmentRow {
            id: 1,
            employee_id: 1,
            project_id: 1,
            task_id: 1,
            task_name: "x".into(),
            work_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            status: "started".into(),
            target_quantity: None,
            target_unit: None,
            target_description: None,
            progress_percent: 0,
            start_time: None,
            completed_at: None,
            pause_history: Json(Vec::new()),
            supervisor_id: None,
        };
        assert!(WorkerTaskAssignment::try_from(row).is_err());
    }
}
