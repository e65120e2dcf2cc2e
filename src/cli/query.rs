use super::{open_storage, planner_for, CliError};
use crate::config::Config;
use crate::model::StoredRecord;
use crate::query::{QueryParams, QueryResult};
use crate::storage::RecordStore;
use std::io::Read;

/// Query parameters from an inline JSON object, or stdin when absent or `-`
pub fn read_params(input: Option<&str>) -> Result<QueryParams, CliError> {
    let text = match input {
        Some(text) if text != "-" => text.to_string(),
        _ => {
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text)?;
            text
        }
    };
    if text.trim().is_empty() {
        return Ok(QueryParams::default());
    }
    let value: serde_json::Value = serde_json::from_str(&text)?;
    Ok(QueryParams::from_value(value)?)
}

pub async fn query(config: &Config, params: QueryParams) -> Result<QueryResult, CliError> {
    let storage = open_storage(config).await?;
    let planner = planner_for(&storage, config);
    Ok(planner.execute(params).await?)
}

pub async fn run_query(config: &Config, input: Option<&str>) -> Result<(), CliError> {
    let params = read_params(input)?;
    let result = query(config, params).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

pub async fn show(config: &Config, id: i64) -> Result<StoredRecord, CliError> {
    let storage = open_storage(config).await?;
    storage
        .get_record(id)
        .await?
        .ok_or_else(|| CliError::NotFound(format!("no process record with id {}", id)))
}

pub async fn run_show(config: &Config, id: i64) -> Result<(), CliError> {
    let record = show(config, id).await?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}
