pub mod datum;
pub mod geography;
pub mod indicator;
pub mod taxonomy;
pub mod time_axis;
pub mod timestamp;
pub mod variable;

pub use datum::{percent_of, Datum, GeogCollection, GeogRecord};
pub use geography::{
    parse_subregion_lines, GeogKind, Geography, GeographyCatalog, SUBGEOG_TYPE_ORDER,
};
pub use indicator::{DataResponse, Dimensions, Indicator};
pub use taxonomy::{Domain, Subdomain, Taxonomy, Topic};
pub use time_axis::{Direction, TimeAxis, TimeAxisKind, TimePart, TimeUnit, MAX_COUNT};
pub use timestamp::{TimePoint, UtcDateTime};
pub use variable::{
    find_denominator_cycle, AggregationMethod, CensusBinding, Variable, VariableKind,
};
