mod cache;
mod catalog;
mod census;
mod data;
mod geo;
mod map;
mod sql;

use std::sync::Arc;

use profiles_core::{
    Envelope, EnvelopeError, EnvelopeMeta, HttpClient, IndicatorEngine, ProfilesConfig,
    ReqwestHttpClient, RequestContext, Warehouse,
};
use serde_json::Value;

use crate::cli::{Cli, Command};
use crate::error::CliError;

/// Source chain reported by commands that only touch the local warehouse.
const LOCAL_SOURCE: &str = "warehouse";

pub struct CommandResult {
    pub data: Value,
    pub meta: EnvelopeMeta,
    pub errors: Vec<EnvelopeError>,
}

impl CommandResult {
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            meta: EnvelopeMeta::new(vec![String::from(LOCAL_SOURCE)]),
            errors: Vec::new(),
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.meta = self.meta.with_warnings([warning.into()]);
        self
    }

    pub fn with_errors(mut self, errors: impl IntoIterator<Item = EnvelopeError>) -> Self {
        self.errors.extend(errors);
        self
    }

    /// Warnings, provenance, and timing gathered by a resolution request.
    pub fn with_context(mut self, context: &RequestContext) -> Self {
        let earlier = std::mem::take(&mut self.meta.warnings);
        self.meta = EnvelopeMeta::from_context(context, LOCAL_SOURCE).with_warnings(earlier);
        self
    }
}

/// Everything a command may need, opened on first use.
pub struct Session {
    pub config: ProfilesConfig,
}

impl Session {
    pub fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        let mut config = ProfilesConfig::from_env()?
            .with_cache_mode(cli.cache_mode.into())
            .with_offline(cli.offline);
        if let Some(path) = &cli.catalog {
            config = config.with_catalog_path(path.clone());
        }
        Ok(Self { config })
    }

    pub fn warehouse(&self) -> Result<Warehouse, CliError> {
        Ok(Warehouse::open(self.config.warehouse.clone())?)
    }

    pub fn engine(&self) -> Result<IndicatorEngine, CliError> {
        let http: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new());
        Ok(IndicatorEngine::open(&self.config, self.warehouse()?, http)?)
    }
}

pub async fn run(cli: &Cli) -> Result<Envelope<Value>, CliError> {
    let session = Session::from_cli(cli)?;

    let command_result = match &cli.command {
        Command::Data(args) => data::run(args, &session).await?,
        Command::Map(args) => map::run(args, &session).await?,
        Command::Cache(args) => cache::run(args, &session)?,
        Command::Geo(args) => geo::run(args, &session)?,
        Command::Census(args) => census::run(args, &session)?,
        Command::Catalog(args) => catalog::run(args, &session)?,
        Command::Taxonomy => catalog::taxonomy(&session)?,
        Command::Sql(args) => sql::run(args, &session)?,
    };

    Ok(Envelope::new(
        command_result.meta,
        command_result.data,
        command_result.errors,
    ))
}
