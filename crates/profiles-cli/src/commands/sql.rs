use profiles_core::QueryGuardrails;

use crate::cli::SqlArgs;
use crate::error::CliError;

use super::{CommandResult, Session};

pub fn run(args: &SqlArgs, session: &Session) -> Result<CommandResult, CliError> {
    let query = args.query.trim();
    if query.is_empty() {
        return Err(CliError::Command(String::from("query must not be empty")));
    }

    let guardrails = QueryGuardrails {
        max_rows: args.max_rows,
        query_timeout_ms: args.query_timeout_ms,
    };
    let result = session
        .warehouse()?
        .execute_query(query, guardrails, args.write)?;
    tracing::debug!(rows = result.row_count, write = args.write, "sql executed");

    let truncated = result.truncated.then_some(result.row_count);
    let command_result = CommandResult::ok(serde_json::to_value(&result)?);
    Ok(match truncated {
        Some(rows) => command_result.with_warning(format!(
            "result truncated at {rows} rows (use --max-rows to increase limit)"
        )),
        None => command_result,
    })
}
