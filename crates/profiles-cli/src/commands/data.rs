use profiles_core::{EnvelopeError, RequestContext};

use crate::cli::DataArgs;
use crate::error::CliError;

use super::{CommandResult, Session};

pub async fn run(args: &DataArgs, session: &Session) -> Result<CommandResult, CliError> {
    let engine = session.engine()?;
    let mut context = RequestContext::new();
    let response = engine
        .get_data_with(
            &args.indicator,
            args.geog_type,
            &args.geog_id,
            args.across,
            &mut context,
        )
        .await?;

    tracing::info!(
        indicator = %args.indicator,
        geog = %args.geog_id,
        fetches = context.fetches(),
        cache_hits = context.cache_hits(),
        elapsed_ms = context.elapsed_ms(),
        "indicator resolved"
    );

    let error = EnvelopeError::from_record(&response.error);
    // Response warnings already live in the context.
    Ok(CommandResult::ok(serde_json::to_value(&response)?)
        .with_context(&context)
        .with_errors(error))
}
