//! Operator CLI handlers for `careplan item` subcommands.

use anyhow::{Context, Result};
use chrono::Local;
use sqlx::PgPool;
use uuid::Uuid;

use careplan_core::error::status_label;
use careplan_core::service::ItemChange;
use careplan_core::tracker::ItemUpdate;

use crate::ItemCommands;
use crate::config::CareplanConfig;
use crate::menu_cmd::require;
use crate::plan_cmds::service;

pub async fn run_item_command(
    command: ItemCommands,
    pool: &PgPool,
    config: &CareplanConfig,
) -> Result<()> {
    require(&config.capabilities, "plans.edit")?;
    let service = service(pool);

    match command {
        ItemCommands::Update {
            item_id,
            name,
            price,
            minutes,
            expected_version,
        } => {
            let id = parse_item_id(&item_id)?;
            let update = ItemUpdate {
                item_name: name,
                price,
                estimated_time_minutes: minutes,
            };
            if update == ItemUpdate::default() {
                anyhow::bail!("nothing to update; pass --name, --price, or --minutes");
            }
            let change = service.update_item(id, &update, expected_version).await?;
            print_change(&change, "updated");
        }
        ItemCommands::Skip {
            item_id,
            expected_version,
        } => {
            let id = parse_item_id(&item_id)?;
            let change = service.skip_item(id, expected_version).await?;
            print_change(&change, "skipped");
        }
        ItemCommands::Complete {
            item_id,
            note,
            on,
            expected_version,
        } => {
            let id = parse_item_id(&item_id)?;
            let on_date = on.unwrap_or_else(|| Local::now().date_naive());
            let plan = service
                .complete_item_manually(id, on_date, &note, expected_version)
                .await?;
            println!(
                "Item {id} completed on {on_date}. Plan {} is now {} (version {}).",
                plan.code,
                status_label(plan.status),
                plan.version
            );
        }
    }
    Ok(())
}

fn parse_item_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("invalid item ID: {raw}"))
}

fn print_change(change: &ItemChange, what: &str) {
    let item = &change.item;
    println!(
        "Item {} ({}) {what}: {:.2}, {} min, {}.",
        item.id, item.item_name, item.price, item.estimated_time_minutes, item.status
    );
    println!(
        "  {} (total {:.2} -> {:.2}, final {:.2} -> {:.2}, plan version {})",
        change.financial_impact.describe(),
        change.financial_impact.old_total_cost,
        change.financial_impact.new_total_cost,
        change.financial_impact.old_final_cost,
        change.financial_impact.new_final_cost,
        change.plan_version
    );
}
