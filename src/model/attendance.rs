use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct Attendance {
    pub id: u64,
    pub employee_id: u64,
    pub project_id: u64,
    /// UTC calendar day of `check_in`
    #[schema(value_type = String, format = "date")]
    pub date: NaiveDate,
    #[schema(value_type = String, format = "date-time")]
    pub check_in: DateTime<Utc>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub check_out: Option<DateTime<Utc>>,
    pub check_in_latitude: Option<f64>,
    pub check_in_longitude: Option<f64>,
    pub check_in_distance_m: Option<f64>,
}

/// The attendance day a timestamp belongs to (UTC midnight normalization).
pub fn attendance_day(ts: DateTime<Utc>) -> NaiveDate {
    ts.date_naive()
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct AttendanceDateRow {
    pub id: u64,
    pub employee_id: u64,
    pub date: NaiveDate,
    pub check_in: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AttendanceRepair {
    /// Rewrite `date` to the UTC day of `check_in`
    Redate {
        id: u64,
        employee_id: u64,
        #[schema(value_type = String, format = "date")]
        from: NaiveDate,
        #[schema(value_type = String, format = "date")]
        to: NaiveDate,
    },
    /// A row for the corrected day already exists; drop this duplicate
    Delete {
        id: u64,
        employee_id: u64,
        #[schema(value_type = String, format = "date")]
        date: NaiveDate,
        #[schema(value_type = String, format = "date")]
        duplicate_of_date: NaiveDate,
    },
}

/// Plan repairs for rows whose `date` drifted from their check-in day.
///
/// `occupied` holds the (employee_id, date) keys of every row that is already
/// correct. Drifted rows are processed earliest check-in first so the first
/// one claiming a day keeps it.
pub fn plan_attendance_repairs(
    drifted: &[AttendanceDateRow],
    occupied: &HashSet<(u64, NaiveDate)>,
) -> Vec<AttendanceRepair> {
    let mut taken = occupied.clone();
    let mut rows: Vec<&AttendanceDateRow> = drifted
        .iter()
        .filter(|r| attendance_day(r.check_in) != r.date)
        .collect();
    rows.sort_by_key(|r| (r.check_in, r.id));

    let mut plan = Vec::with_capacity(rows.len());
    for row in rows {
        let to = attendance_day(row.check_in);
        if taken.insert((row.employee_id, to)) {
            plan.push(AttendanceRepair::Redate {
                id: row.id,
                employee_id: row.employee_id,
                from: row.date,
                to,
            });
        } else {
            plan.push(AttendanceRepair::Delete {
                id: row.id,
                employee_id: row.employee_id,
                date: row.date,
                duplicate_of_date: to,
            });
        }
    }
    plan
}

/// Order in which a repair plan can be applied without tripping the
/// one-row-per-day unique key.
#[derive(Debug, Default, PartialEq)]
pub struct RepairSchedule {
    pub deletes: Vec<u64>,
    /// `(id, new date)`, applied after every delete and in this order
    pub redates: Vec<(u64, NaiveDate)>,
    /// Re-dates whose target day stays held by another drifted row (circular swaps)
    pub skipped: Vec<u64>,
}

/// Deletes run first. A re-date is scheduled once no pending drifted row
/// still sits on its target day; rows that never become free are skipped.
pub fn schedule_attendance_repairs(plan: &[AttendanceRepair]) -> RepairSchedule {
    let mut schedule = RepairSchedule::default();
    let mut held = HashSet::new();
    let mut pending = Vec::new();

    for repair in plan {
        match *repair {
            AttendanceRepair::Delete { id, .. } => schedule.deletes.push(id),
            AttendanceRepair::Redate { id, employee_id, from, to } => {
                held.insert((employee_id, from));
                pending.push((id, employee_id, from, to));
            }
        }
    }

    loop {
        let before = pending.len();
        pending.retain(|&(id, employee_id, from, to)| {
            if held.contains(&(employee_id, to)) {
                return true;
            }
            held.remove(&(employee_id, from));
            held.insert((employee_id, to));
            schedule.redates.push((id, to));
            false
        });
        if pending.is_empty() || pending.len() == before {
            break;
        }
    }

    schedule.skipped = pending.into_iter().map(|(id, ..)| id).collect();
    schedule
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, d).unwrap()
    }

    fn row(id: u64, employee_id: u64, date: NaiveDate, check_in: DateTime<Utc>) -> AttendanceDateRow {
        AttendanceDateRow { id, employee_id, date, check_in }
    }

    #[test]
    fn local_evening_check_in_maps_to_utc_day() {
        // 21:30 at UTC-05:00 is 02:30 the next day in UTC
        let local = FixedOffset::west_opt(5 * 3600)
            .unwrap()
            .with_ymd_and_hms(2026, 5, 3, 21, 30, 0)
            .unwrap();
        assert_eq!(attendance_day(local.with_timezone(&Utc)), day(4));
    }

    #[test]
    fn drifted_rows_are_redated() {
        // stored with a +06:00 local date, checked in at 20:00 UTC the day before
        let drifted = vec![row(1, 10, day(5), Utc.with_ymd_and_hms(2026, 5, 4, 20, 0, 0).unwrap())];

        let plan = plan_attendance_repairs(&drifted, &HashSet::new());

        assert_eq!(
            plan,
            vec![AttendanceRepair::Redate { id: 1, employee_id: 10, from: day(5), to: day(4) }]
        );
    }

    #[test]
    fn collision_with_existing_row_deletes_duplicate() {
        let drifted = vec![row(2, 10, day(5), Utc.with_ymd_and_hms(2026, 5, 4, 23, 0, 0).unwrap())];
        let occupied = HashSet::from([(10, day(4))]);

        let plan = plan_attendance_repairs(&drifted, &occupied);

        assert_eq!(
            plan,
            vec![AttendanceRepair::Delete {
                id: 2,
                employee_id: 10,
                date: day(5),
                duplicate_of_date: day(4),
            }]
        );
    }

    #[test]
    fn earliest_drifted_row_wins_the_day() {
        let drifted = vec![
            row(4, 10, day(7), Utc.with_ymd_and_hms(2026, 5, 6, 22, 0, 0).unwrap()),
            row(3, 10, day(8), Utc.with_ymd_and_hms(2026, 5, 6, 7, 0, 0).unwrap()),
        ];

        let plan = plan_attendance_repairs(&drifted, &HashSet::new());

        assert!(matches!(plan[0], AttendanceRepair::Redate { id: 3, .. }));
        assert!(matches!(plan[1], AttendanceRepair::Delete { id: 4, .. }));
    }

    #[test]
    fn rows_already_normalized_are_skipped() {
        let ok = vec![row(5, 1, day(9), Utc.with_ymd_and_hms(2026, 5, 9, 0, 0, 0).unwrap())];
        assert!(plan_attendance_repairs(&ok, &HashSet::new()).is_empty());
    }

    fn redate(id: u64, from: u32, to: u32) -> AttendanceRepair {
        AttendanceRepair::Redate { id, employee_id: 10, from: day(from), to: day(to) }
    }

    #[test]
    fn schedule_waits_for_the_row_holding_the_target_day() {
        // row 1 moves 6 -> 5, but row 2 still sits on day 5 until it moves to 4
        let plan = vec![redate(1, 6, 5), redate(2, 5, 4)];

        let schedule = schedule_attendance_repairs(&plan);

        assert_eq!(schedule.redates, vec![(2, day(4)), (1, day(5))]);
        assert!(schedule.skipped.is_empty());
    }

    #[test]
    fn circular_swap_is_skipped() {
        let plan = vec![redate(1, 6, 5), redate(2, 5, 6), redate(3, 9, 8)];

        let schedule = schedule_attendance_repairs(&plan);

        assert_eq!(schedule.redates, vec![(3, day(8))]);
        assert_eq!(schedule.skipped, vec![1, 2]);
    }

    #[test]
    fn deletes_free_their_day_first() {
        let plan = vec![
            AttendanceRepair::Delete { id: 7, employee_id: 10, date: day(5), duplicate_of_date: day(4) },
            redate(1, 6, 5),
        ];

        let schedule = schedule_attendance_repairs(&plan);

        assert_eq!(schedule.deletes, vec![7]);
        assert_eq!(schedule.redates, vec![(1, day(5))]);
    }

    #[test]
    fn planned_drift_chain_can_be_applied() {
        // checked in on the 4th and 5th but stored one day late
        let drifted = vec![
            row(1, 10, day(6), Utc.with_ymd_and_hms(2026, 5, 5, 20, 0, 0).unwrap()),
            row(2, 10, day(5), Utc.with_ymd_and_hms(2026, 5, 4, 20, 0, 0).unwrap()),
        ];

        let plan = plan_attendance_repairs(&drifted, &HashSet::new());
        let schedule = schedule_attendance_repairs(&plan);

        assert!(schedule.deletes.is_empty());
        assert_eq!(schedule.redates, vec![(2, day(4)), (1, day(5))]);
    }
}
