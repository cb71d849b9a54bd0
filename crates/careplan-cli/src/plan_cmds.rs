//! Operator CLI handlers for `careplan plan` subcommands.
//!
//! Implements:
//! - `careplan plan create <file>`     -- create a draft plan from a TOML file
//! - `careplan plan show [code]`       -- show plan details or list all plans
//! - `careplan plan submit <code>`     -- draft -> awaiting review
//! - `careplan plan approve <code>`    -- awaiting review -> approved
//! - `careplan plan reject <code>`     -- awaiting review -> rejected
//! - `careplan plan reopen <code>`     -- rejected -> draft
//! - `careplan plan release <code> <n>` -- release a later phase early
//! - `careplan plan cancel <code>`     -- cancel a plan (withdraws one not yet approved)

use anyhow::{Context, Result};
use sqlx::PgPool;

use careplan_core::error::status_label;
use careplan_core::plan::parse_plan_toml;
use careplan_core::service::PlanService;
use careplan_core::status::{is_withdrawn, item_display_status, phase_status, plan_status};
use careplan_core::store::PgPlanStore;
use careplan_db::models::{PlanStatus, TreatmentPlan};

use crate::PlanCommands;
use crate::config::CareplanConfig;
use crate::menu_cmd::require;

pub(crate) fn service(pool: &PgPool) -> PlanService<PgPlanStore> {
    PlanService::new(PgPlanStore::new(pool.clone()))
}

// -----------------------------------------------------------------------
// Public entry point
// -----------------------------------------------------------------------

/// Dispatch a `PlanCommands` variant to the appropriate handler.
pub async fn run_plan_command(
    command: PlanCommands,
    pool: &PgPool,
    config: &CareplanConfig,
) -> Result<()> {
    let held = &config.capabilities;
    let service = service(pool);
    match command {
        PlanCommands::Create { file, json } => {
            require(held, "plans.create")?;
            cmd_create(&service, &file, json).await
        }
        PlanCommands::Show { code, json } => {
            require(held, "plans")?;
            match code {
                Some(code) => cmd_show_one(&service, &code, json).await,
                None => cmd_show_all(&service, json).await,
            }
        }
        PlanCommands::Submit {
            code,
            expected_version,
        } => {
            require(held, "plans.edit")?;
            let plan = service.submit_for_review(&code, expected_version).await?;
            print_transition(&plan, "submitted for review");
            Ok(())
        }
        PlanCommands::Approve {
            code,
            notes,
            expected_version,
        } => {
            require(held, "plans.review")?;
            let plan = service
                .approve(&code, notes.as_deref(), expected_version)
                .await?;
            print_transition(&plan, "approved");
            Ok(())
        }
        PlanCommands::Reject {
            code,
            notes,
            expected_version,
        } => {
            require(held, "plans.review")?;
            let plan = service.reject(&code, &notes, expected_version).await?;
            print_transition(&plan, "rejected");
            Ok(())
        }
        PlanCommands::Reopen {
            code,
            expected_version,
        } => {
            require(held, "plans.edit")?;
            let plan = service.reopen(&code, expected_version).await?;
            print_transition(&plan, "reopened as draft");
            Ok(())
        }
        PlanCommands::Release {
            code,
            phase,
            expected_version,
        } => {
            require(held, "plans.edit")?;
            let plan = service.release_phase(&code, phase, expected_version).await?;
            print_transition(&plan, &format!("released phase {phase}"));
            Ok(())
        }
        PlanCommands::Cancel {
            code,
            reason,
            expected_version,
        } => {
            require(held, "plans.cancel")?;
            let plan = service.cancel_plan(&code, &reason, expected_version).await?;
            print_transition(&plan, "cancelled");
            Ok(())
        }
    }
}

fn status_text(status: Option<PlanStatus>, withdrawn: bool) -> String {
    if withdrawn {
        "withdrawn".to_owned()
    } else {
        status_label(status)
    }
}

fn print_transition(plan: &TreatmentPlan, what: &str) {
    println!(
        "Plan {} {what} (approval: {}, status: {}, version {}).",
        plan.code,
        plan.approval_status,
        status_text(plan.status, is_withdrawn(plan)),
        plan.version
    );
}

// -----------------------------------------------------------------------
// careplan plan create <file>
// -----------------------------------------------------------------------

async fn cmd_create(service: &PlanService<PgPlanStore>, file_path: &str, json: bool) -> Result<()> {
    let content = std::fs::read_to_string(file_path)
        .with_context(|| format!("failed to read plan file: {file_path}"))?;
    let request = parse_plan_toml(&content)
        .with_context(|| format!("failed to parse plan file: {file_path}"))?;

    let plan = service.create_custom_plan(&request).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    println!("Plan created successfully.");
    println!();
    println!("  Code:        {}", plan.code);
    println!("  Name:        {}", plan.name);
    println!("  Phases:      {}", plan.phases.len());
    println!("  Items:       {}", plan.items().count());
    println!("  Total cost:  {:.2}", plan.total_cost);
    println!("  Discount:    {:.2}", plan.discount_amount);
    println!("  Final cost:  {:.2}", plan.final_cost);
    println!();
    println!("Next: `careplan plan submit {}`", plan.code);
    Ok(())
}

// -----------------------------------------------------------------------
// careplan plan show
// -----------------------------------------------------------------------

async fn cmd_show_all(service: &PlanService<PgPlanStore>, json: bool) -> Result<()> {
    let plans = service.list_plans().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plans)?);
        return Ok(());
    }
    if plans.is_empty() {
        println!("No plans found. Use `careplan plan create <file>` to create one.");
        return Ok(());
    }

    let code_w = plans.iter().map(|p| p.code().len()).max().unwrap_or(4).max(4);
    let name_w = plans.iter().map(|p| p.name().len()).max().unwrap_or(4).max(4);
    let approval_w = 15;
    let status_w = 11;

    println!(
        "{:<code_w$}  {:<name_w$}  {:<approval_w$}  {:<status_w$}  {:>10}  ITEMS",
        "CODE", "NAME", "APPROVAL", "STATUS", "FINAL",
    );
    for plan in &plans {
        let progress = plan.progress();
        println!(
            "{:<code_w$}  {:<name_w$}  {:<approval_w$}  {:<status_w$}  {:>10.2}  {}/{}",
            plan.code(),
            plan.name(),
            plan.approval_status().to_string(),
            status_text(plan.status(), plan.withdrawn()),
            plan.final_cost(),
            progress.closed(),
            progress.total(),
        );
    }
    Ok(())
}

async fn cmd_show_one(service: &PlanService<PgPlanStore>, code: &str, json: bool) -> Result<()> {
    if json {
        let view = service.view(code, true).await?;
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    let plan = service.get_plan(code).await?;
    println!("Plan:       {} ({})", plan.code, plan.name);
    println!("Patient:    {}", plan.patient_id);
    println!("Doctor:     {}", plan.doctor_id);
    println!("Approval:   {}", plan.approval_status);
    println!(
        "Status:     {}",
        status_text(plan_status(&plan), is_withdrawn(&plan))
    );
    println!("Starts:     {}", plan.start_date);
    println!(
        "Cost:       {:.2} - {:.2} = {:.2} ({})",
        plan.total_cost, plan.discount_amount, plan.final_cost, plan.payment_type
    );
    println!("Version:    {}", plan.version);
    if let Some(notes) = &plan.review_notes {
        println!("Review:     {notes}");
    }
    if let Some(reason) = &plan.cancellation_reason {
        println!("Cancelled:  {reason}");
    }

    for phase in &plan.phases {
        println!();
        println!(
            "Phase {} - {} [{}]",
            phase.phase_number,
            phase.name,
            phase_status(&plan, phase)
        );
        for item in &phase.items {
            println!(
                "  {:>3}. {:<24} {:>9.2}  {:>4}m  {:<24} {}",
                item.sequence_number,
                item.item_name,
                item.price,
                item.estimated_time_minutes,
                item_display_status(&plan, item).to_string(),
                item.id,
            );
        }
    }
    Ok(())
}
