//! Behavior-driven tests for indicator resolution
//!
//! These tests drive the engine the way the `data` command does: one
//! indicator, one geography, answered from bureau tables in the warehouse.

use profiles_core::{
    CoreError, ErrorLevel, GeogKind, RequestContext, UtcDateTime, ValidationError,
};
use profiles_tests::{seeded, HOOD, TRACT_A};

fn context() -> RequestContext {
    RequestContext::at(UtcDateTime::parse("2024-06-01T00:00:00Z").expect("fixed clock"))
}

// =============================================================================
// Direct values
// =============================================================================

#[tokio::test]
async fn when_user_requests_population_for_a_tract_then_value_and_moe_are_returned() {
    // Given: Bureau values for tract 2010
    let (_temp, _warehouse, engine) = seeded();
    let mut context = context();

    // When: User asks for total population of the tract
    let response = engine
        .get_data_with("total-pop", GeogKind::Tract, TRACT_A, false, &mut context)
        .await
        .expect("resolution should not abort");

    // Then: A single cell carries the value and its margin of error
    assert!(response.is_ok(), "unexpected error: {:?}", response.error);
    assert_eq!(response.dimensions.shape(), (1, 1, 1));
    assert_eq!(response.dimensions.geog, vec![format!("tract-{TRACT_A}")]);
    assert_eq!(response.dimensions.time, vec!["acs-2019:2019"]);
    assert_eq!(response.dimensions.vars, vec!["total-pop"]);

    let cell = response.cell(0, 0, 0).expect("cell present");
    assert_eq!(cell.value, Some(3_000.0));
    assert_eq!(cell.moe, Some(120.0));
    assert_eq!(cell.percent, None, "total population has no denominator");
    assert!(response.map_options.is_none(), "not requested across geographies");
    assert_eq!(context.source_chain(), ["acs5-2019"]);
}

#[tokio::test]
async fn when_variable_has_a_denominator_then_percent_is_value_over_denominator() {
    // Given: Under-18 count 600 and total population 3000 for the tract
    let (_temp, _warehouse, engine) = seeded();

    // When: User asks for the youth indicator
    let response = engine
        .get_data("youth", GeogKind::Tract, TRACT_A, false)
        .await
        .expect("resolution");

    // Then: Denominator and percent are filled in
    let cell = response.cell(0, 0, 0).expect("cell present");
    assert_eq!(cell.value, Some(600.0));
    assert_eq!(cell.denom, Some(3_000.0));
    let percent = cell.percent.expect("percent");
    assert!((percent - 0.2).abs() < 1e-9, "percent was {percent}");
}

// =============================================================================
// Roll-up through sub-geographies
// =============================================================================

#[tokio::test]
async fn when_neighborhood_is_requested_then_tract_values_are_summed() {
    // Given: A neighborhood made of both tracts, which the bureau does not publish
    let (_temp, _warehouse, engine) = seeded();
    let mut context = context();

    // When: User asks for the neighborhood's population
    let response = engine
        .get_data_with("total-pop", GeogKind::Neighborhood, HOOD, false, &mut context)
        .await
        .expect("resolution");

    // Then: Values sum and margins combine as root-sum-of-squares
    assert!(response.is_ok());
    let cell = response.cell(0, 0, 0).expect("cell present");
    assert_eq!(cell.geog, "neighborhood-central");
    assert_eq!(cell.value, Some(5_000.0));
    let moe = cell.moe.expect("moe");
    assert!((moe - 150.0).abs() < 1e-9, "moe was {moe}");
    assert!(context.warnings().is_empty());
}

#[tokio::test]
async fn when_a_subregion_value_is_missing_then_aggregate_is_null_with_warning() {
    // Given: Only one of the two tracts has an under-18 count
    let (_temp, _warehouse, engine) = seeded();
    let mut context = context();

    // When: User asks for the youth indicator of the neighborhood
    let response = engine
        .get_data_with("youth", GeogKind::Neighborhood, HOOD, false, &mut context)
        .await
        .expect("resolution");

    // Then: The response succeeds with a null value and a partial-aggregate warning
    assert!(response.is_ok());
    let cell = response.cell(0, 0, 0).expect("cell present");
    assert_eq!(cell.value, None);
    assert_eq!(cell.percent, None);
    assert!(
        response
            .warnings
            .iter()
            .any(|warning| warning == "aggregate partial for central at 2019"),
        "warnings were {:?}",
        response.warnings
    );
}

// =============================================================================
// Error records
// =============================================================================

#[tokio::test]
async fn when_no_source_covers_the_year_then_missing_source_error_is_returned() {
    // Given: Bureau coverage starting in 2015
    let (_temp, _warehouse, engine) = seeded();

    // When: User asks for population on a 2005 axis
    let response = engine
        .get_data("pop-2005", GeogKind::Tract, TRACT_A, false)
        .await
        .expect("retrieval errors are reported, not raised");

    // Then: The error record explains which variable and year are uncovered
    assert!(!response.is_ok());
    assert_eq!(response.error.level, ErrorLevel::Error);
    assert_eq!(response.error.status, "ERROR");
    assert_eq!(
        response.error.message.as_deref(),
        Some("No source provides Total Population for 2005.")
    );
    assert_eq!(response.dimensions.time, vec!["acs-2005:2005"]);
    assert!(response.data.is_empty());
}

#[tokio::test]
async fn when_geography_is_unknown_then_validation_error_is_raised() {
    // Given: A seeded engine
    let (_temp, _warehouse, engine) = seeded();

    // When: User asks for a tract that is not in the catalog
    let error = engine
        .get_data("total-pop", GeogKind::Tract, "99999999999", false)
        .await
        .expect_err("unknown geography");

    // Then: The caller gets a validation error, not an error record
    assert!(matches!(
        error,
        CoreError::Validation(ValidationError::UnknownGeography { .. })
    ));
}

// =============================================================================
// Warnings
// =============================================================================

#[tokio::test]
async fn when_variable_combines_moe_tables_then_warning_is_reported_once() {
    // Given: A poverty variable summing two tables, over two years
    let (_temp, _warehouse, engine) = seeded();

    // When: User asks for the two-year trend
    let response = engine
        .get_data("poverty-trend", GeogKind::Tract, TRACT_A, false)
        .await
        .expect("resolution");

    // Then: Both years are summed, MOE is dropped, and the warning appears once
    assert!(response.is_ok());
    assert_eq!(response.dimensions.shape(), (1, 2, 1));
    for time in 0..2 {
        let cell = response.cell(0, time, 0).expect("cell present");
        assert_eq!(cell.value, Some(150.0));
        assert_eq!(cell.moe, None);
    }
    let moe_warnings = response
        .warnings
        .iter()
        .filter(|warning| warning.starts_with("MOE unavailable for Persons below poverty"))
        .count();
    assert_eq!(moe_warnings, 1, "warnings were {:?}", response.warnings);
}

// =============================================================================
// Cache
// =============================================================================

#[tokio::test]
async fn when_indicator_is_requested_twice_then_second_answer_comes_from_cache() {
    // Given: A first request that fetched from the bureau tables
    let (_temp, warehouse, engine) = seeded();
    let mut first = context();
    let first_response = engine
        .get_data_with("total-pop", GeogKind::Tract, TRACT_A, false, &mut first)
        .await
        .expect("first resolution");
    assert_eq!(first.fetches(), 1);

    // When: A fresh engine over the same warehouse answers the same request
    let engine = profiles_tests::engine(&warehouse);
    let mut second = context();
    let second_response = engine
        .get_data_with("total-pop", GeogKind::Tract, TRACT_A, false, &mut second)
        .await
        .expect("second resolution");

    // Then: No fetch happens and the value is unchanged
    assert_eq!(second.fetches(), 0);
    assert_eq!(second.cache_hits(), 1);
    assert_eq!(second_response.data, first_response.data);
}

#[tokio::test]
async fn when_cache_is_bypassed_then_values_are_fetched_again() {
    // Given: A warm cache
    let (_temp, warehouse, engine) = seeded();
    engine
        .get_data("total-pop", GeogKind::Tract, TRACT_A, false)
        .await
        .expect("warm cache");

    // When: The next request bypasses the cache
    let engine = profiles_tests::engine_with_mode(&warehouse, profiles_core::CacheMode::Bypass);
    let mut context = context();
    engine
        .get_data_with("total-pop", GeogKind::Tract, TRACT_A, false, &mut context)
        .await
        .expect("bypass resolution");

    // Then: The source is queried again
    assert_eq!(context.fetches(), 1);
    assert_eq!(context.cache_hits(), 0);
}
