use profiles_core::{EnvelopeError, MapMaterializer, RequestContext};
use serde_json::json;

use crate::cli::{MapArgs, MapCommand};
use crate::error::CliError;

use super::{CommandResult, Session};

pub async fn run(args: &MapArgs, session: &Session) -> Result<CommandResult, CliError> {
    match &args.command {
        MapCommand::Build {
            indicator,
            geog_type,
        } => {
            let engine = session.engine()?;
            let mut context = RequestContext::new();
            let response = engine.build_map(indicator, *geog_type, &mut context).await?;

            let mut result = CommandResult::ok(json!({
                "indicator": indicator,
                "geog_type": geog_type,
                "map_options": response.map_options,
                "error": response.error,
            }))
            .with_context(&context)
            .with_errors(EnvelopeError::from_record(&response.error));
            if response.is_ok() && response.map_options.is_none() {
                result = result.with_warning(format!("{indicator} is not mappable"));
            }
            Ok(result)
        }
        MapCommand::Geojson { slug } => {
            let maps = materializer(session)?;
            Ok(CommandResult::ok(maps.geojson(slug)?))
        }
        MapCommand::List => {
            let maps = materializer(session)?;
            Ok(CommandResult::ok(serde_json::to_value(maps.list_layers()?)?))
        }
        MapCommand::Drop { slug } => {
            let maps = materializer(session)?;
            let dropped = maps.drop_layer(slug)?;
            let result = CommandResult::ok(json!({"slug": slug, "dropped": dropped}));
            Ok(if dropped {
                result
            } else {
                result.with_warning(format!("layer '{slug}' did not exist"))
            })
        }
        MapCommand::Clear => {
            let maps = materializer(session)?;
            Ok(CommandResult::ok(json!({"dropped": maps.clear_layers()?})))
        }
    }
}

fn materializer(session: &Session) -> Result<MapMaterializer, CliError> {
    Ok(MapMaterializer::new(session.warehouse()?).with_map_host(session.config.map_host.clone()))
}
