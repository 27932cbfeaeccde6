use profiles_core::{UtcDateTime, ValueCache};
use serde_json::json;

use crate::cli::{CacheArgs, CacheCommand};
use crate::error::CliError;

use super::{CommandResult, Session};

pub fn run(args: &CacheArgs, session: &Session) -> Result<CommandResult, CliError> {
    let cache = ValueCache::persistent(session.warehouse()?);
    match args.command {
        CacheCommand::Clear => {
            let removed = cache.clear()?;
            tracing::info!(removed, "value cache cleared");
            Ok(CommandResult::ok(json!({"removed": removed})))
        }
        CacheCommand::Prune => {
            let removed = cache.clear_expired(UtcDateTime::now())?;
            tracing::info!(removed, "expired cache rows pruned");
            Ok(CommandResult::ok(json!({"removed": removed})))
        }
    }
}
