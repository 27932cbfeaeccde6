use std::fs;

use profiles_warehouse::CensusValueRecord;
use serde_json::json;

use crate::cli::{CensusArgs, CensusCommand};
use crate::error::CliError;

use super::{CommandResult, Session};

pub fn run(args: &CensusArgs, session: &Session) -> Result<CommandResult, CliError> {
    match &args.command {
        CensusCommand::Load { file } => {
            let (records, rejected) = parse_values(&fs::read_to_string(file)?);
            let warehouse = session.warehouse()?;
            let written = warehouse.upsert_census_values(&records)?;
            tracing::info!(written, rejected = rejected.len(), "census values loaded");

            let mut result = CommandResult::ok(json!({
                "loaded": written,
                "rejected": rejected.len(),
            }));
            for line in rejected.iter().take(10) {
                result = result.with_warning(format!("line {line}: expected geoid,dataset,year,table_id,value"));
            }
            Ok(result)
        }
    }
}

/// `geoid,dataset,year,table_id,value` lines. A header row, blank lines, and
/// `#` comments are skipped; returns the 1-based numbers of malformed lines.
fn parse_values(text: &str) -> (Vec<CensusValueRecord>, Vec<usize>) {
    let mut records = Vec::new();
    let mut rejected = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with("geoid,") {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let [geoid, dataset, year, table_id, raw] = fields.as_slice() else {
            rejected.push(index + 1);
            continue;
        };
        let Ok(year) = year.parse::<i32>() else {
            rejected.push(index + 1);
            continue;
        };
        records.push(CensusValueRecord {
            geoid: (*geoid).to_owned(),
            dataset: (*dataset).to_owned(),
            year,
            table_id: (*table_id).to_owned(),
            value: raw.parse::<f64>().ok(),
            raw_value: (!raw.is_empty()).then(|| (*raw).to_owned()),
        });
    }
    (records, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_values_and_reports_bad_lines() {
        let text = "geoid,dataset,year,table_id,value\n\
                    42003020100,ACS5,2019,B01003_001E,3120\n\
                    42003020100,ACS5,2019,B01003_001M,.\n\
                    broken line\n";
        let (records, rejected) = parse_values(text);

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].value, Some(3120.0));
        assert_eq!(records[1].value, None);
        assert_eq!(records[1].raw_value.as_deref(), Some("."));
        assert_eq!(rejected, vec![4]);
    }
}
