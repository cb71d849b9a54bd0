//! `careplan schedule`: suggest slots for a plan and optionally book them.
//!
//! Working hours come from a roster file. Existing reservations from the
//! `appointments` table are subtracted before the search, and closures come
//! from the `holidays` table.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use chrono::{Days, NaiveTime};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use careplan_core::PlanError;
use careplan_core::availability::{DateRange, Resource, RosterAvailability};
use careplan_core::booking::PgBookingGateway;
use careplan_core::calendar::PgHolidayCalendar;
use careplan_core::scheduler::{
    ItemOutcome, ScheduleRequest, ScheduleResult, ScheduleScope, search_window,
};
use careplan_core::service::PlanService;
use careplan_core::store::PgPlanStore;
use careplan_db::queries::appointments;

use crate::ScheduleArgs;
use crate::config::CareplanConfig;
use crate::menu_cmd::require;
use crate::plan_cmds::service;

pub async fn run_schedule(
    args: &ScheduleArgs,
    pool: &PgPool,
    config: &CareplanConfig,
) -> Result<()> {
    require(&config.capabilities, "schedule")?;
    if args.book {
        require(&config.capabilities, "schedule.book")?;
    }

    let service = service(pool);
    let plan = service.get_plan(&args.code).await?;
    let request = ScheduleRequest {
        from_date: args.from,
        max_search_days: args.days.unwrap_or(config.max_search_days),
        preferred_doctor_id: args.doctor,
        per_item_timeout: args
            .timeout_secs
            .map(Duration::from_secs)
            .or(config.per_item_timeout),
    };
    let scope = args.phase.map_or(ScheduleScope::Plan, ScheduleScope::Phase);

    let mut roster = RosterAvailability::load(Path::new(&args.roster))?;
    let window = search_window(&plan, scope, &request);
    let mut doctors = roster.doctor_ids();
    doctors.extend([plan.doctor_id]);
    doctors.extend(request.preferred_doctor_id);
    doctors.sort_unstable();
    doctors.dedup();
    for doctor_id in doctors {
        let taken = appointments::list_for_doctor(
            pool,
            doctor_id,
            window.start.and_time(NaiveTime::MIN),
            (window.end + Days::new(1)).and_time(NaiveTime::MIN),
        )
        .await?;
        tracing::debug!(doctor_id, booked = taken.len(), "loaded existing appointments");
        for appointment in taken {
            roster.add_booked(
                Resource::Doctor(doctor_id),
                appointment.starts_at,
                appointment.ends_at,
            );
        }
    }
    let calendar = PgHolidayCalendar::new(pool.clone());

    // First signal cancels the search, second force-exits.
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let got_first_signal = Arc::new(AtomicBool::new(false));
    let got_first_clone = Arc::clone(&got_first_signal);
    let watcher = tokio::spawn(async move {
        loop {
            tokio::signal::ctrl_c().await.ok();
            if got_first_clone.swap(true, Ordering::SeqCst) {
                eprintln!("\nForce exit.");
                std::process::exit(130);
            }
            eprintln!("\nStopping search (Ctrl+C again to force)...");
            cancel_clone.cancel();
        }
    });

    let outcome = schedule_and_book(
        args, &service, &calendar, &roster, &request, scope, pool, &cancel,
    )
    .await;
    watcher.abort();
    outcome
}

#[allow(clippy::too_many_arguments)]
async fn schedule_and_book(
    args: &ScheduleArgs,
    service: &PlanService<PgPlanStore>,
    calendar: &PgHolidayCalendar,
    roster: &RosterAvailability,
    request: &ScheduleRequest,
    scope: ScheduleScope,
    pool: &PgPool,
    cancel: &CancellationToken,
) -> Result<()> {
    let result = match service
        .auto_schedule(&args.code, scope, request, calendar, roster, cancel)
        .await
    {
        Err(PlanError::Cancelled) => {
            println!("Search interrupted; nothing was booked.");
            std::process::exit(130);
        }
        other => other?,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }

    if !args.book {
        return Ok(());
    }

    let gateway = PgBookingGateway::new(pool.clone());
    let mut booked = 0usize;
    let mut conflicts = Vec::new();
    for suggestion in result.suggestions() {
        if cancel.is_cancelled() {
            println!("Interrupted after {booked} booking(s).");
            break;
        }
        match service
            .book_suggestion(&args.code, suggestion, &gateway, None)
            .await
        {
            Ok(booking) => {
                booked += 1;
                println!(
                    "Booked {} with doctor {} at {} (appointment {}).",
                    suggestion.item_name,
                    booking.appointment.doctor_id,
                    booking.appointment.starts_at.format("%Y-%m-%d %H:%M"),
                    booking.appointment.appointment_id
                );
            }
            Err(err) if err.is_retryable() => {
                tracing::warn!(
                    item = %suggestion.item_name,
                    error = %err,
                    "slot taken before booking"
                );
                println!("Not booked: {} ({err}).", suggestion.item_name);
                conflicts.push(suggestion.item_name.clone());
            }
            Err(err) => return Err(err.into()),
        }
    }

    if !conflicts.is_empty() {
        println!();
        println!(
            "{} slot(s) were taken meanwhile. Re-run `careplan schedule {} --book` to retry.",
            conflicts.len(),
            args.code
        );
    }
    Ok(())
}

fn print_result(result: &ScheduleResult) {
    for item in &result.items {
        let label = format!("P{}.{} {}", item.phase_number, item.sequence_number, item.item_name);
        match &item.outcome {
            ItemOutcome::Suggested(s) => {
                let reassign = if s.requires_reassign { "  [reassigned]" } else { "" };
                println!(
                    "  {label:<32} {} {}-{}  doctor {}{reassign}",
                    s.date,
                    s.starts_at.format("%H:%M"),
                    s.ends_at.format("%H:%M"),
                    s.doctor_id
                );
                if let Some(warning) = &s.warning {
                    println!("  {:<32} ! {warning}", "");
                }
            }
            ItemOutcome::Failed { reason } => println!("  {label:<32} FAILED: {reason}"),
            ItemOutcome::Skipped { reason } => println!("  {label:<32} skipped: {reason}"),
        }
    }
    let s = &result.summary;
    println!();
    println!(
        "{} processed: {} suggested, {} failed, {} skipped, {} with warnings.",
        s.total_items_processed,
        s.successful_suggestions,
        s.failed_items,
        s.skipped_items,
        s.warnings
    );
}
