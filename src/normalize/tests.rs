use super::*;
use crate::config::ForecastFamily;

const HEADER: &str =
    "reference_date,target,horizon,location,target_end_date,output_type,output_type_id,value";

fn table(body: &str) -> RawTable {
    let raw = format!("{HEADER}\n{body}");
    RawTable::from_delimited(raw.as_bytes()).expect("fixture table should parse")
}

fn normalize(table: &RawTable, config: &HubConfig) -> NormalizedFile {
    normalize_table(
        table,
        Path::new("model-output/team-model/2024-01-06-team-model.csv"),
        "team-model",
        config,
    )
    .expect("fixture should normalize")
}

fn date(raw: &str) -> NaiveDate {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("valid fixture date")
}

#[test]
fn quantile_groups_are_sorted_and_filtered_to_retained_levels() {
    let table = table(
        "\
2024-01-06,wk inc flu hosp,0,US,2024-01-06,quantile,0.975,50
2024-01-06,wk inc flu hosp,0,US,2024-01-06,quantile,0.5,30
2024-01-06,wk inc flu hosp,0,US,2024-01-06,quantile,0.1,15
2024-01-06,wk inc flu hosp,0,US,2024-01-06,quantile,0.025,10
2024-01-06,wk inc flu hosp,0,US,2024-01-06,quantile,0.75,40
2024-01-06,wk inc flu hosp,0,US,2024-01-06,quantile,0.25,20
",
    );

    let file = normalize(&table, &HubConfig::default());
    assert_eq!(file.predictions.len(), 1);
    assert_eq!(file.counts.rows_read, 6);
    assert_eq!(file.counts.filtered_quantile_level, 1);
    assert_eq!(file.counts.rows_kept, 5);

    let (key, prediction) = &file.predictions[0];
    assert_eq!(key.location, "US");
    assert_eq!(key.model, "team-model");
    assert_eq!(key.horizon, 0);
    assert_eq!(prediction.target_end_date, date("2024-01-06"));

    match &prediction.distribution {
        Distribution::Quantile { levels, values } => {
            assert_eq!(levels.len(), values.len());
            assert_eq!(levels, &vec![0.025, 0.25, 0.5, 0.75, 0.975]);
            assert_eq!(values, &vec![10.0, 20.0, 30.0, 40.0, 50.0]);
        }
        other => panic!("expected quantiles, got {other:?}"),
    }
}

#[test]
fn all_levels_are_kept_when_retention_is_disabled() {
    let table = table(
        "\
2024-01-06,wk inc flu hosp,1,06,2024-01-13,quantile,0.1,15
2024-01-06,wk inc flu hosp,1,06,2024-01-13,quantile,0.5,30
",
    );
    let config = HubConfig {
        retained_quantiles: None,
        ..HubConfig::default()
    };

    let file = normalize(&table, &config);
    match &file.predictions[0].1.distribution {
        Distribution::Quantile { levels, .. } => assert_eq!(levels, &vec![0.1, 0.5]),
        other => panic!("expected quantiles, got {other:?}"),
    }
}

#[test]
fn duplicate_levels_keep_the_later_row() {
    let table = table(
        "\
2024-01-06,wk inc flu hosp,0,US,2024-01-06,quantile,0.5,30
2024-01-06,wk inc flu hosp,0,US,2024-01-06,quantile,0.50,31
",
    );

    let file = normalize(&table, &HubConfig::default());
    match &file.predictions[0].1.distribution {
        Distribution::Quantile { levels, values } => {
            assert_eq!(levels, &vec![0.5]);
            assert_eq!(values, &vec![31.0]);
        }
        other => panic!("expected quantiles, got {other:?}"),
    }
}

#[test]
fn missing_required_columns_reject_the_whole_file() {
    let raw = "reference_date,target,location,output_type,output_type_id,value\n\
2024-01-06,wk inc flu hosp,US,quantile,0.5,30\n";
    let table = RawTable::from_delimited(raw.as_bytes()).expect("table should parse");

    let err = normalize_table(
        &table,
        Path::new("model-output/m/2024-01-06-m.csv"),
        "m",
        &HubConfig::default(),
    )
    .expect_err("horizon column is required");

    match err {
        FileError::MissingColumns { columns, .. } => assert_eq!(columns, vec!["horizon"]),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn row_level_failures_drop_only_the_row() {
    let table = table(
        "\
2024-01-06,wk inc flu hosp,0,US,2024-01-06,quantile,0.5,30
not-a-date,wk inc flu hosp,0,US,2024-01-06,quantile,0.25,20
2024-01-06,wk inc flu hosp,0,US,2024-01-06,quantile,median,25
2024-01-06,wk inc flu hosp,0,US,2024-01-06,quantile,0.75,lots
2024-01-06,wk inc flu hosp,soon,US,2024-01-06,quantile,0.75,40
2024-01-06,wk inc flu hosp,0,US,2024-01-06,mean,,35
2024-01-06,wk inc flu hosp,0,,2024-01-06,quantile,0.975,50
",
    );

    let file = normalize(&table, &HubConfig::default());
    assert_eq!(file.counts.rows_read, 7);
    assert_eq!(file.counts.dropped_bad_date, 1);
    assert_eq!(file.counts.dropped_bad_type_id, 1);
    assert_eq!(file.counts.dropped_bad_value, 1);
    assert_eq!(file.counts.dropped_bad_horizon, 1);
    assert_eq!(file.counts.dropped_unsupported_type, 1);
    assert_eq!(file.counts.dropped_missing_field, 1);
    assert_eq!(file.counts.rows_kept, 1);

    assert_eq!(file.predictions.len(), 1);
    match &file.predictions[0].1.distribution {
        Distribution::Quantile { levels, values } => {
            assert_eq!(levels, &vec![0.5]);
            assert_eq!(values, &vec![30.0]);
        }
        other => panic!("expected quantiles, got {other:?}"),
    }
}

#[test]
fn sample_rows_are_dropped_unless_enabled() {
    let body = "\
2024-01-06,wk inc flu hosp,0,US,2024-01-06,sample,1,11
2024-01-06,wk inc flu hosp,0,US,2024-01-06,sample,2,13
";

    let dropped = normalize(&table(body), &HubConfig::default());
    assert!(dropped.predictions.is_empty());
    assert_eq!(dropped.counts.dropped_sample, 2);

    let config = HubConfig {
        keep_samples: true,
        ..HubConfig::default()
    };
    let kept = normalize(&table(body), &config);
    assert_eq!(kept.predictions.len(), 1);
    assert_eq!(
        kept.predictions[0].1.distribution,
        Distribution::Sample {
            draws: vec![11.0, 13.0]
        }
    );
}

#[test]
fn pmf_categories_follow_the_configured_order() {
    let table = table(
        "\
2024-01-06,wk flu hosp rate change,1,US,2024-01-13,pmf,increase,0.2
2024-01-06,wk flu hosp rate change,1,US,2024-01-13,pmf,large_decrease,0.1
2024-01-06,wk flu hosp rate change,1,US,2024-01-13,pmf,stable,0.4
2024-01-06,wk flu hosp rate change,1,US,2024-01-13,pmf,decrease,0.2
2024-01-06,wk flu hosp rate change,1,US,2024-01-13,pmf,large_increase,0.1
",
    );

    let file = normalize(&table, &HubConfig::default());
    match &file.predictions[0].1.distribution {
        Distribution::Pmf {
            categories,
            probabilities,
        } => {
            assert_eq!(
                categories,
                &vec![
                    "large_decrease",
                    "decrease",
                    "stable",
                    "increase",
                    "large_increase"
                ]
            );
            assert_eq!(probabilities, &vec![0.1, 0.2, 0.4, 0.2, 0.1]);
        }
        other => panic!("expected pmf, got {other:?}"),
    }
}

#[test]
fn pmf_without_known_order_keeps_file_order() {
    let table = table(
        "\
2024-01-06,peak week inc flu hosp,0,US,2024-01-06,pmf,2024-01-20,0.7
2024-01-06,peak week inc flu hosp,0,US,2024-01-06,pmf,2024-01-13,0.3
",
    );

    let file = normalize(&table, &HubConfig::default());
    match &file.predictions[0].1.distribution {
        Distribution::Pmf { categories, .. } => {
            assert_eq!(categories, &vec!["2024-01-20", "2024-01-13"]);
        }
        other => panic!("expected pmf, got {other:?}"),
    }
}

#[test]
fn groups_split_by_horizon_and_target() {
    let table = table(
        "\
2024-01-06,wk inc flu hosp,0,US,2024-01-06,quantile,0.5,30
2024-01-06,wk inc flu hosp,1,US,2024-01-13,quantile,0.5,35
2024-01-06,wk flu hosp rate change,1,US,2024-01-13,pmf,stable,1.0
",
    );

    let file = normalize(&table, &HubConfig::default());
    assert_eq!(file.predictions.len(), 3);
    let horizons: Vec<(String, i32)> = file
        .predictions
        .iter()
        .map(|(key, _)| (key.target.clone(), key.horizon))
        .collect();
    assert!(horizons.contains(&("wk inc flu hosp".to_string(), 0)));
    assert!(horizons.contains(&("wk inc flu hosp".to_string(), 1)));
    assert!(horizons.contains(&("wk flu hosp rate change".to_string(), 1)));
}

#[test]
fn mixed_output_types_keep_the_first_type_of_the_group() {
    let table = table(
        "\
2024-01-06,wk inc flu hosp,0,US,2024-01-06,quantile,0.5,30
2024-01-06,wk inc flu hosp,0,US,2024-01-06,pmf,stable,0.5
",
    );

    let file = normalize(&table, &HubConfig::default());
    assert_eq!(file.counts.dropped_mixed_type, 1);
    assert!(matches!(
        file.predictions[0].1.distribution,
        Distribution::Quantile { .. }
    ));
}

#[test]
fn target_end_date_is_derived_when_the_column_is_absent() {
    let raw = "origin_date,target,horizon,location,age_group,output_type,output_type_id,value\n\
2025-01-04,inc hosp,2,06,0-0.99,quantile,0.5,12\n\
2025-01-04,inc hosp,2,06,75-130,quantile,0.5,12\n";
    let table = RawTable::from_delimited(raw.as_bytes()).expect("table should parse");

    let file = normalize(&table, &HubConfig::preset(ForecastFamily::Rsv));
    assert_eq!(file.counts.dropped_age_group, 1);
    assert_eq!(file.predictions.len(), 1);

    let (key, prediction) = &file.predictions[0];
    assert_eq!(key.age_group.as_deref(), Some("0-0.99"));
    assert_eq!(key.reference_date, date("2025-01-04"));
    assert_eq!(prediction.target_end_date, date("2025-01-18"));
}

#[test]
fn reference_date_aliases_are_tried_in_order() {
    let raw = "forecast_date,target,horizon,location,age_group,output_type,output_type_id,value\n\
2025-01-04 00:00:00,inc hosp,0.0,US,0-130,quantile,0.5,12\n";
    let table = RawTable::from_delimited(raw.as_bytes()).expect("table should parse");

    let file = normalize(&table, &HubConfig::preset(ForecastFamily::Rsv));
    assert_eq!(file.predictions.len(), 1);
    assert_eq!(file.predictions[0].0.reference_date, date("2025-01-04"));
    assert_eq!(file.predictions[0].0.horizon, 0);
}

#[test]
fn rsv_files_without_age_group_are_rejected() {
    let err = normalize_table(
        &table("2024-01-06,inc hosp,0,US,2024-01-06,quantile,0.5,30\n"),
        Path::new("m.csv"),
        "m",
        &HubConfig::preset(ForecastFamily::Rsv),
    )
    .expect_err("age group is required for rsv");

    match err {
        FileError::MissingColumns { columns, .. } => {
            assert!(columns.contains(&"age_group".to_string()));
            assert!(columns.contains(&"origin_date|forecast_date".to_string()));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn parse_horizon_accepts_integral_floats_only() {
    assert_eq!(parse_horizon("2"), Some(2));
    assert_eq!(parse_horizon("-1"), Some(-1));
    assert_eq!(parse_horizon("3.0"), Some(3));
    assert_eq!(parse_horizon("1.5"), None);
    assert_eq!(parse_horizon("next"), None);
}
