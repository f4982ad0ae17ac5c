//! Run export for operator review: CSV (one row per step) and JSON.

use crate::errors::Result;
use crate::run::{Run, RunItem, RunStep, RunType, StepResult, TaskKind};
use chrono::serde::{ts_milliseconds, ts_milliseconds_option};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use uuid::Uuid;

const CSV_HEADER: &str = "runId,windowKey,repo,iterationKey,plannedOrder,executedOrder,stepType,stepResult,stepStart,stepEnd,message,finalResult";

/// Render a run as CSV, one row per recorded step. Optional values render
/// as empty cells; messages are quoted per RFC 4180 when they need it.
pub fn to_csv(run: &Run) -> String {
    let mut out = String::from(CSV_HEADER);
    out.push('\n');
    for item in &run.items {
        for step in &item.steps {
            let fields = [
                run.id.to_string(),
                item.window_key.clone(),
                item.repo.clone(),
                item.iteration_key.clone().unwrap_or_default(),
                item.planned_order.to_string(),
                item.executed_order
                    .map(|o| o.to_string())
                    .unwrap_or_default(),
                step.action.to_string(),
                step.result.to_string(),
                timestamp(step.started_at),
                timestamp(step.finished_at),
                step.message.clone(),
                item.final_result
                    .map(|r| r.to_string())
                    .unwrap_or_default(),
            ];
            let row: Vec<String> = fields.iter().map(|f| csv_field(f)).collect();
            out.push_str(&row.join(","));
            out.push('\n');
        }
    }
    out
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// JSON document mirroring the run structure with epoch-millisecond
/// timestamps.
#[derive(Debug, Serialize)]
pub struct RunDocument {
    pub run_id: Uuid,
    pub run_type: RunType,
    pub window_key: String,
    #[serde(with = "ts_milliseconds")]
    pub started_at: DateTime<Utc>,
    #[serde(with = "ts_milliseconds_option")]
    pub finished_at: Option<DateTime<Utc>>,
    pub items: Vec<ItemDocument>,
}

#[derive(Debug, Serialize)]
pub struct ItemDocument {
    pub repo: String,
    pub iteration_key: Option<String>,
    pub planned_order: u32,
    pub executed_order: Option<u32>,
    pub final_result: Option<StepResult>,
    pub steps: Vec<StepDocument>,
}

#[derive(Debug, Serialize)]
pub struct StepDocument {
    pub action: TaskKind,
    pub result: StepResult,
    #[serde(with = "ts_milliseconds")]
    pub started_at: DateTime<Utc>,
    #[serde(with = "ts_milliseconds")]
    pub finished_at: DateTime<Utc>,
    pub message: String,
}

impl From<&RunStep> for StepDocument {
    fn from(step: &RunStep) -> Self {
        Self {
            action: step.action,
            result: step.result,
            started_at: step.started_at,
            finished_at: step.finished_at,
            message: step.message.clone(),
        }
    }
}

impl From<&RunItem> for ItemDocument {
    fn from(item: &RunItem) -> Self {
        Self {
            repo: item.repo.clone(),
            iteration_key: item.iteration_key.clone(),
            planned_order: item.planned_order,
            executed_order: item.executed_order,
            final_result: item.final_result,
            steps: item.steps.iter().map(StepDocument::from).collect(),
        }
    }
}

pub fn to_document(run: &Run) -> RunDocument {
    RunDocument {
        run_id: run.id,
        run_type: run.run_type,
        window_key: run.window_key.clone(),
        started_at: run.started_at,
        finished_at: run.finished_at,
        items: run.items.iter().map(ItemDocument::from).collect(),
    }
}

pub fn to_json(run: &Run) -> Result<String> {
    Ok(serde_json::to_string_pretty(&to_document(run)).map_err(anyhow::Error::from)?)
}
