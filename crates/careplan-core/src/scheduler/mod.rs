//! Auto-scheduler.
//!
//! Proposes appointment slots for a plan's bookable items without reserving
//! anything. Items are placed one at a time in (phase, sequence) order
//! because each item's earliest date depends on where the previous one
//! landed.
//!
//! A run takes one snapshot of availability per doctor and never writes, so
//! identical inputs always produce identical suggestions.

mod types;

pub use types::{
    DEFAULT_MAX_SEARCH_DAYS, ItemOutcome, ItemResult, ScheduleRequest, ScheduleResult,
    ScheduleScope, ScheduleSummary, Suggestion,
};

use std::collections::HashMap;

use anyhow::Context;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use careplan_db::models::{
    AppointmentStatus, ApprovalStatus, Item, ItemStatus, PlanStatus, TreatmentPlan,
};

use crate::availability::{Availability, DateRange, Resource, subtract_intervals};
use crate::calendar::HolidayCalendar;
use crate::error::{PlanError, ValidationError, status_label};

type Interval = (NaiveDateTime, NaiveDateTime);

/// Slot finder over a holiday calendar and an availability source.
pub struct AutoScheduler<'a> {
    calendar: &'a dyn HolidayCalendar,
    availability: &'a dyn Availability,
}

impl<'a> AutoScheduler<'a> {
    pub fn new(calendar: &'a dyn HolidayCalendar, availability: &'a dyn Availability) -> Self {
        Self {
            calendar,
            availability,
        }
    }

    /// Suggest a slot for every bookable item in `scope`.
    ///
    /// Per-item failures are reported in the result; only an ineligible
    /// plan, an unknown phase, a collaborator error, or cancellation fail
    /// the whole run.
    pub async fn suggest(
        &self,
        plan: &TreatmentPlan,
        scope: ScheduleScope,
        request: &ScheduleRequest,
        cancel: &CancellationToken,
    ) -> Result<ScheduleResult, PlanError> {
        ensure_schedulable(plan)?;
        if let ScheduleScope::Phase(n) = scope {
            if plan.phase(n).is_none() {
                return Err(ValidationError::UnknownPhase(n).into());
            }
        }

        let ordered = ordered_items(plan);
        let window_start = first_search_day(plan, request);
        let assigned = request.preferred_doctor_id.unwrap_or(plan.doctor_id);

        let mut run = Run {
            snapshot: Snapshot::new(
                self.availability,
                horizon(&ordered, scope, window_start, request.max_search_days),
            ),
            claimed: HashMap::new(),
            suggested: HashMap::new(),
        };
        let mut results = Vec::new();
        let mut anchor: Option<&Item> = None;

        for &(phase_number, item) in &ordered {
            if item.status == ItemStatus::Skipped {
                continue;
            }
            if !scope.includes(phase_number) || item.status == ItemStatus::Completed {
                anchor = Some(item);
                continue;
            }
            if cancel.is_cancelled() {
                return Err(PlanError::Cancelled);
            }

            let outcome = match item.status {
                ItemStatus::Scheduled | ItemStatus::InProgress => ItemOutcome::Skipped {
                    reason: "already scheduled".to_owned(),
                },
                ItemStatus::WaitingForPrerequisite => ItemOutcome::Skipped {
                    reason: match item.prerequisite_item_id {
                        Some(id) => format!("waiting for prerequisite {id}"),
                        None => "waiting for prerequisite".to_owned(),
                    },
                },
                ItemStatus::Pending => ItemOutcome::Skipped {
                    reason: format!("phase {phase_number} has not been released"),
                },
                _ => {
                    let earliest =
                        earliest_allowed(plan, item, anchor, window_start, &run.suggested);
                    let placement = self.place_item(
                        &mut run,
                        phase_number,
                        item,
                        assigned,
                        earliest,
                        request.max_search_days,
                        cancel,
                    );
                    match request.per_item_timeout {
                        Some(limit) => match tokio::time::timeout(limit, placement).await {
                            Ok(outcome) => outcome?,
                            Err(_) => {
                                tracing::warn!(item_id = %item.id, ?limit, "item search timed out");
                                ItemOutcome::Failed {
                                    reason: format!("timed out after {}ms", limit.as_millis()),
                                }
                            }
                        },
                        None => placement.await?,
                    }
                }
            };

            if let ItemOutcome::Suggested(s) = &outcome {
                run.suggested.insert(item.id, s.date);
                run.claimed
                    .entry(s.doctor_id)
                    .or_default()
                    .push((s.starts_at, s.ends_at));
            }
            tracing::debug!(item_id = %item.id, phase = phase_number, ?outcome, "item processed");

            results.push(ItemResult {
                item_id: item.id,
                phase_number,
                sequence_number: item.sequence_number,
                item_name: item.item_name.clone(),
                outcome,
            });
            anchor = Some(item);
        }

        let result = ScheduleResult::new(results);
        tracing::info!(
            plan_code = %plan.code,
            processed = result.summary.total_items_processed,
            suggested = result.summary.successful_suggestions,
            failed = result.summary.failed_items,
            skipped = result.summary.skipped_items,
            "auto-schedule finished"
        );
        Ok(result)
    }

    /// Scan day by day from `earliest` for the first slot that fits.
    #[allow(clippy::too_many_arguments)]
    async fn place_item(
        &self,
        run: &mut Run<'_>,
        phase_number: i32,
        item: &Item,
        assigned: i64,
        earliest: NaiveDate,
        max_search_days: u32,
        cancel: &CancellationToken,
    ) -> Result<ItemOutcome, PlanError> {
        let duration = Duration::minutes(i64::from(item.estimated_time_minutes));
        let capable = run.snapshot.capable_doctors(item.service_id).await?;
        let default = item.default_doctor_id.filter(|d| *d != assigned);
        let fallbacks: Vec<i64> = capable
            .iter()
            .copied()
            .filter(|d| *d != assigned && Some(*d) != default)
            .collect();

        let mut shifted_from: Option<NaiveDate> = None;
        let last_day = earliest + Duration::days(i64::from(max_search_days) - 1);

        for day in DateRange::new(earliest, last_day).days() {
            if cancel.is_cancelled() {
                return Err(PlanError::Cancelled);
            }
            tokio::task::yield_now().await;

            let closed = self
                .calendar
                .is_holiday(day)
                .await
                .with_context(|| format!("failed to check holiday calendar for {day}"))?;
            if closed {
                if day == earliest {
                    shifted_from = Some(day);
                }
                continue;
            }

            let mut choice = None;
            for (doctor, reassign) in std::iter::once(assigned)
                .chain(default)
                .map(|d| (d, false))
            {
                if let Some(start) = run.first_fit(doctor, day, duration).await? {
                    choice = Some((doctor, start, reassign));
                    break;
                }
            }

            if choice.is_none() {
                let mut best: Option<(NaiveDateTime, i64)> = None;
                for &doctor in &fallbacks {
                    if let Some(start) = run.first_fit(doctor, day, duration).await? {
                        if best.is_none_or(|b| (start, doctor) < b) {
                            best = Some((start, doctor));
                        }
                    }
                }
                choice = best.map(|(start, doctor)| (doctor, start, true));
            }

            let Some((doctor_id, starts_at, requires_reassign)) = choice else {
                continue;
            };

            let mut warnings = Vec::new();
            if let Some(holiday) = shifted_from {
                warnings.push(format!("{holiday} is a clinic holiday; moved to {day}"));
            }
            if requires_reassign {
                warnings.push(format!(
                    "doctor {assigned} has no capacity on {day}; reassigned to doctor {doctor_id}"
                ));
            }

            return Ok(ItemOutcome::Suggested(Suggestion {
                item_id: item.id,
                phase_number,
                sequence_number: item.sequence_number,
                item_name: item.item_name.clone(),
                date: day,
                starts_at,
                ends_at: starts_at + duration,
                doctor_id,
                warning: (!warnings.is_empty()).then(|| warnings.join("; ")),
                requires_reassign,
            }));
        }

        let reason = if capable.is_empty() && default.is_none() {
            format!(
                "no free slot with doctor {assigned} and no other doctor performs service {}",
                item.service_id
            )
        } else {
            format!("no doctor available within {max_search_days} days from {earliest}")
        };
        Ok(ItemOutcome::Failed { reason })
    }
}

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

struct Run<'a> {
    snapshot: Snapshot<'a>,
    /// Time handed out to earlier suggestions in this run, per doctor.
    claimed: HashMap<i64, Vec<Interval>>,
    suggested: HashMap<Uuid, NaiveDate>,
}

impl Run<'_> {
    /// Start of the earliest free interval on `day` long enough for
    /// `duration`, after removing time already claimed in this run.
    async fn first_fit(
        &mut self,
        doctor: i64,
        day: NaiveDate,
        duration: Duration,
    ) -> Result<Option<NaiveDateTime>, PlanError> {
        let free = self.snapshot.free_on(doctor, day).await?;
        let busy = self.claimed.get(&doctor).map(Vec::as_slice).unwrap_or(&[]);
        Ok(subtract_intervals(&free, busy)
            .into_iter()
            .find(|(start, end)| *end - *start >= duration)
            .map(|(start, _)| start))
    }
}

/// Availability fetched at most once per doctor and service for a run.
struct Snapshot<'a> {
    availability: &'a dyn Availability,
    range: DateRange,
    free: HashMap<i64, Vec<Interval>>,
    capable: HashMap<i64, Vec<i64>>,
}

impl<'a> Snapshot<'a> {
    fn new(availability: &'a dyn Availability, range: DateRange) -> Self {
        Self {
            availability,
            range,
            free: HashMap::new(),
            capable: HashMap::new(),
        }
    }

    async fn free_on(&mut self, doctor: i64, day: NaiveDate) -> Result<Vec<Interval>, PlanError> {
        if !self.free.contains_key(&doctor) {
            let slots = self
                .availability
                .free_slots(Resource::Doctor(doctor), self.range)
                .await
                .with_context(|| format!("failed to fetch availability for doctor {doctor}"))?;
            let mut intervals: Vec<Interval> =
                slots.into_iter().map(|s| (s.starts_at, s.ends_at)).collect();
            intervals.sort();
            self.free.insert(doctor, intervals);
        }
        Ok(self
            .free
            .get(&doctor)
            .map(|all| {
                all.iter()
                    .filter(|(start, _)| start.date() == day)
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn capable_doctors(&mut self, service_id: i64) -> Result<Vec<i64>, PlanError> {
        if let Some(ids) = self.capable.get(&service_id) {
            return Ok(ids.clone());
        }
        let mut ids = self
            .availability
            .doctors_for_service(service_id)
            .await
            .with_context(|| format!("failed to list doctors for service {service_id}"))?;
        ids.sort_unstable();
        ids.dedup();
        self.capable.insert(service_id, ids.clone());
        Ok(ids)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn ensure_schedulable(plan: &TreatmentPlan) -> Result<(), PlanError> {
    let entity = format!("plan {}", plan.code);
    if plan.approval_status != ApprovalStatus::Approved {
        return Err(PlanError::transition(
            entity,
            plan.approval_status,
            "auto-schedule",
        ));
    }
    if matches!(
        plan.status,
        Some(PlanStatus::Completed | PlanStatus::Cancelled)
    ) {
        return Err(PlanError::transition(
            entity,
            status_label(plan.status),
            "auto-schedule",
        ));
    }
    Ok(())
}

/// Every item with its phase number, in (phase, sequence) order.
fn ordered_items(plan: &TreatmentPlan) -> Vec<(i32, &Item)> {
    let mut phases: Vec<_> = plan.phases.iter().collect();
    phases.sort_by_key(|p| p.phase_number);
    phases
        .into_iter()
        .flat_map(|phase| {
            let mut items: Vec<&Item> = phase.items.iter().collect();
            items.sort_by_key(|i| i.sequence_number);
            items.into_iter().map(move |i| (phase.phase_number, i))
        })
        .collect()
}

/// Date the item is anchored to: a suggestion from this run, else its latest
/// live appointment, else its completion date.
fn anchor_date(item: &Item, suggested: &HashMap<Uuid, NaiveDate>) -> Option<NaiveDate> {
    suggested.get(&item.id).copied().or_else(|| {
        item.linked_appointments
            .iter()
            .filter(|a| {
                !matches!(
                    a.status,
                    AppointmentStatus::Cancelled | AppointmentStatus::NoShow
                )
            })
            .map(|a| a.starts_at.date())
            .max()
            .or(item.completed_on)
    })
}

fn earliest_allowed(
    plan: &TreatmentPlan,
    item: &Item,
    anchor: Option<&Item>,
    window_start: NaiveDate,
    suggested: &HashMap<Uuid, NaiveDate>,
) -> NaiveDate {
    let spacing = item.spacing_days.map(|d| Duration::days(i64::from(d)));
    let mut earliest = window_start;

    let prerequisite_done = item
        .prerequisite_item_id
        .and_then(|id| plan.find_item(id))
        .filter(|p| p.status == ItemStatus::Completed)
        .and_then(|p| p.completed_on);
    if let Some(done) = prerequisite_done {
        earliest = earliest.max(done + spacing.unwrap_or_else(Duration::zero));
    }

    if let (Some(spacing), Some(anchor_day)) =
        (spacing, anchor.and_then(|a| anchor_date(a, suggested)))
    {
        earliest = earliest.max(anchor_day + spacing);
    }
    earliest
}

fn first_search_day(plan: &TreatmentPlan, request: &ScheduleRequest) -> NaiveDate {
    request
        .from_date
        .map_or(plan.start_date, |d| d.max(plan.start_date))
}

/// Days a run over `scope` may read availability for. Callers that build
/// an availability snapshot up front load exactly this range.
pub fn search_window(
    plan: &TreatmentPlan,
    scope: ScheduleScope,
    request: &ScheduleRequest,
) -> DateRange {
    horizon(
        &ordered_items(plan),
        scope,
        first_search_day(plan, request),
        request.max_search_days,
    )
}

/// Last day any item in scope can be scanned: the latest known anchor date
/// plus the search window plus all declared spacing.
fn horizon(
    ordered: &[(i32, &Item)],
    scope: ScheduleScope,
    window_start: NaiveDate,
    max_search_days: u32,
) -> DateRange {
    let base = ordered
        .iter()
        .filter_map(|(_, item)| anchor_date(item, &HashMap::new()))
        .fold(window_start, NaiveDate::max);
    let spacing: i64 = ordered
        .iter()
        .filter(|(phase, item)| scope.includes(*phase) && !item.status.is_closed())
        .filter_map(|(_, item)| item.spacing_days)
        .map(i64::from)
        .sum();
    DateRange::new(
        window_start,
        base + Duration::days(i64::from(max_search_days) + spacing),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::availability::RosterAvailability;
    use crate::calendar::StaticHolidayCalendar;
    use crate::test_fixtures::{approved, at, date, item, phase, plan_with};
    use chrono::{NaiveTime, Weekday};

    const WEEKDAYS: [Weekday; 5] = [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
    ];

    fn hm(h: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, 0, 0).unwrap()
    }

    fn roster(doctors: &[i64]) -> RosterAvailability {
        doctors.iter().fold(RosterAvailability::new(), |r, d| {
            r.with_weekly_hours(Resource::Doctor(*d), &WEEKDAYS, hm(9), hm(12))
                .with_services(*d, &[10])
        })
    }

    async fn run(
        plan: &TreatmentPlan,
        calendar: &StaticHolidayCalendar,
        roster: &RosterAvailability,
    ) -> ScheduleResult {
        AutoScheduler::new(calendar, roster)
            .suggest(
                plan,
                ScheduleScope::Plan,
                &ScheduleRequest::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn suggests_first_free_slot_for_assigned_doctor() {
        let plan = approved(plan_with(vec![phase(1, vec![item(1, 100), item(2, 50)])]));
        let result = run(&plan, &StaticHolidayCalendar::new(), &roster(&[7])).await;

        let s: Vec<_> = result.suggestions().collect();
        assert_eq!(s.len(), 2);
        assert_eq!(s[0].starts_at, at(2026, 10, 19, 9, 0));
        assert_eq!(s[0].ends_at, at(2026, 10, 19, 9, 30));
        // The second item does not reuse time claimed by the first.
        assert_eq!(s[1].starts_at, at(2026, 10, 19, 9, 30));
        assert!(s.iter().all(|s| s.doctor_id == 7 && !s.requires_reassign));
        assert_eq!(result.summary.successful_suggestions, 2);
        assert_eq!(result.summary.warnings, 0);
    }

    #[tokio::test]
    async fn holiday_shift_carries_warning() {
        let plan = approved(plan_with(vec![phase(1, vec![item(1, 100)])]));
        let calendar = StaticHolidayCalendar::new().with_date(date(2026, 10, 19));
        let result = run(&plan, &calendar, &roster(&[7])).await;

        let s = result.suggestions().next().unwrap();
        assert_eq!(s.date, date(2026, 10, 20));
        assert_eq!(
            s.warning.as_deref(),
            Some("2026-10-19 is a clinic holiday; moved to 2026-10-20")
        );
        assert_eq!(result.summary.warnings, 1);
    }

    #[tokio::test]
    async fn spacing_is_measured_from_previous_suggestion() {
        let mut second = item(2, 50);
        second.spacing_days = Some(3);
        let plan = approved(plan_with(vec![phase(1, vec![item(1, 100), second])]));
        let result = run(&plan, &StaticHolidayCalendar::new(), &roster(&[7])).await;

        let dates: Vec<_> = result.suggestions().map(|s| s.date).collect();
        assert_eq!(dates, vec![date(2026, 10, 19), date(2026, 10, 22)]);
    }

    #[tokio::test]
    async fn default_doctor_then_capable_fallback() {
        let mut with_default = item(1, 100);
        with_default.default_doctor_id = Some(8);
        let plan = approved(plan_with(vec![phase(1, vec![with_default, item(2, 50)])]));
        // Doctor 7 (assigned) has no hours at all.
        let roster = roster(&[8, 9, 3]).with_services(7, &[10]);
        let result = run(&plan, &StaticHolidayCalendar::new(), &roster).await;

        let s: Vec<_> = result.suggestions().collect();
        assert_eq!(s[0].doctor_id, 8);
        assert!(!s[0].requires_reassign);
        assert!(s[0].warning.is_none());

        // Lowest id wins among equally early fallbacks.
        assert_eq!(s[1].doctor_id, 3);
        assert!(s[1].requires_reassign);
        assert!(s[1].warning.as_deref().unwrap().contains("reassigned to doctor 3"));
        assert_eq!(result.summary.reassignments, 1);
    }

    #[tokio::test]
    async fn reports_failure_when_no_doctor_is_ever_free() {
        let plan = approved(plan_with(vec![phase(1, vec![item(1, 100)])]));
        let result = run(&plan, &StaticHolidayCalendar::new(), &RosterAvailability::new()).await;

        assert_eq!(result.summary.failed_items, 1);
        assert!(matches!(
            &result.items[0].outcome,
            ItemOutcome::Failed { reason } if reason.contains("service 10")
        ));
    }

    #[tokio::test]
    async fn ineligible_items_are_skipped_with_reason() {
        let plan = approved(plan_with(vec![
            phase(1, vec![item(1, 100)]),
            phase(2, vec![item(1, 50)]),
        ]));
        let result = run(&plan, &StaticHolidayCalendar::new(), &roster(&[7])).await;

        assert_eq!(result.summary.total_items_processed, 2);
        assert_eq!(result.summary.skipped_items, 1);
        assert_eq!(
            result.items[1].outcome,
            ItemOutcome::Skipped {
                reason: "phase 2 has not been released".into()
            }
        );
    }

    #[tokio::test]
    async fn rejects_unapproved_plan_and_unknown_phase() {
        let calendar = StaticHolidayCalendar::new();
        let roster = roster(&[7]);
        let scheduler = AutoScheduler::new(&calendar, &roster);
        let token = CancellationToken::new();

        let draft = plan_with(vec![phase(1, vec![item(1, 100)])]);
        let err = scheduler
            .suggest(&draft, ScheduleScope::Plan, &ScheduleRequest::default(), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, PlanError::InvalidStateTransition { .. }));

        let plan = approved(draft);
        let err = scheduler
            .suggest(&plan, ScheduleScope::Phase(4), &ScheduleRequest::default(), &token)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PlanError::Validation(ValidationError::UnknownPhase(4))
        ));
    }

    #[tokio::test]
    async fn cancelled_token_stops_the_run() {
        let plan = approved(plan_with(vec![phase(1, vec![item(1, 100)])]));
        let calendar = StaticHolidayCalendar::new();
        let roster = roster(&[7]);
        let token = CancellationToken::new();
        token.cancel();

        let err = AutoScheduler::new(&calendar, &roster)
            .suggest(&plan, ScheduleScope::Plan, &ScheduleRequest::default(), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, PlanError::Cancelled));
    }

    #[test]
    fn horizon_covers_search_days_and_spacing() {
        let mut spaced = item(2, 1);
        spaced.spacing_days = Some(5);
        let plan = plan_with(vec![phase(1, vec![item(1, 1), spaced])]);
        let ordered = ordered_items(&plan);
        let range = horizon(&ordered, ScheduleScope::Plan, date(2026, 10, 19), 10);
        assert_eq!(range.start, date(2026, 10, 19));
        assert_eq!(range.end, date(2026, 11, 3));
    }

    #[test]
    fn search_window_clamps_to_plan_start() {
        let plan = plan_with(vec![phase(1, vec![item(1, 1)])]);
        let early = ScheduleRequest {
            from_date: Some(date(2026, 1, 1)),
            max_search_days: 5,
            ..ScheduleRequest::default()
        };
        let range = search_window(&plan, ScheduleScope::Plan, &early);
        assert_eq!(range.start, date(2026, 10, 19));
        assert_eq!(range.end, date(2026, 10, 24));

        let later = ScheduleRequest {
            from_date: Some(date(2026, 11, 2)),
            ..early
        };
        assert_eq!(
            search_window(&plan, ScheduleScope::Plan, &later).start,
            date(2026, 11, 2)
        );
    }

    #[test]
    fn search_window_extends_past_completed_work() {
        let mut done = item(1, 1);
        done.status = ItemStatus::Completed;
        done.completed_on = Some(date(2026, 12, 1));
        let mut next = item(2, 1);
        next.spacing_days = Some(3);
        let plan = plan_with(vec![phase(1, vec![done, next])]);
        let request = ScheduleRequest {
            max_search_days: 5,
            ..ScheduleRequest::default()
        };
        let range = search_window(&plan, ScheduleScope::Plan, &request);
        assert_eq!(range.end, date(2026, 12, 9));
    }
}
