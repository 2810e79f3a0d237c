//! Summary statistics over a [`NormalizedTable`].
//!
//! Metric names are either fixed (`row_count`, `column_count`) or bound to a
//! column as `<column>_<suffix>`, e.g. `age_present_count`. Every metric is a
//! pure function of the table and is recomputed on each request.
//!
//! A column that no record has is not an error: its metrics are zero or
//! empty. An unrecognised metric name fails the whole request before anything
//! is computed.

use chrono::{DateTime, Duration, Utc};
use log::debug;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::error::{ExplorerError, Result};
use crate::normalize::{Cell, NormalizedTable};
use crate::record::FieldValue;

pub const ROW_COUNT: &str = "row_count";
pub const COLUMN_COUNT: &str = "column_count";

/// Per-column metric families, keyed by name suffix.
///
/// `_item_distribution` must be tried before `_distribution`.
const COLUMN_SUFFIXES: [(&str, ColumnMetric); 6] = [
    ("_present_count", ColumnMetric::PresentCount),
    ("_null_count", ColumnMetric::NullCount),
    ("_item_distribution", ColumnMetric::ItemDistribution),
    ("_distribution", ColumnMetric::Distribution),
    ("_numeric_summary", ColumnMetric::NumericSummary),
    ("_time_buckets", ColumnMetric::TimeBuckets),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnMetric {
    /// Cells that are not absent. Explicit nulls count.
    PresentCount,
    /// Cells holding an explicit null.
    NullCount,
    /// Distinct value to occurrence count.
    Distribution,
    /// Like `Distribution`, over the elements of list-valued cells.
    ItemDistribution,
    /// count/sum/mean/min/max of numbers; list cells contribute their length.
    NumericSummary,
    /// Timestamp cells counted per caller-configured bucket.
    TimeBuckets,
}

impl ColumnMetric {
    fn suffix(self) -> &'static str {
        COLUMN_SUFFIXES
            .iter()
            .find(|(_, metric)| *metric == self)
            .map(|(suffix, _)| *suffix)
            .unwrap_or_default()
    }
}

/// A resolved metric request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Metric {
    RowCount,
    ColumnCount,
    Column { column: String, kind: ColumnMetric },
}

impl Metric {
    /// Resolve a metric name against `table`.
    ///
    /// When a name splits into a column and suffix in more than one way, the
    /// split naming an existing column wins, then the longest suffix.
    pub fn parse(name: &str, table: &NormalizedTable) -> Option<Metric> {
        match name {
            ROW_COUNT => return Some(Metric::RowCount),
            COLUMN_COUNT => return Some(Metric::ColumnCount),
            _ => {}
        }

        let candidates: Vec<Metric> = COLUMN_SUFFIXES
            .iter()
            .filter_map(|(suffix, kind)| {
                let column = name.strip_suffix(suffix)?;
                if column.is_empty() {
                    return None;
                }
                Some(Metric::Column {
                    column: column.to_string(),
                    kind: *kind,
                })
            })
            .collect();

        let existing = candidates.iter().position(|metric| match metric {
            Metric::Column { column, .. } => table.column_index(column).is_some(),
            _ => false,
        });
        let chosen = existing.unwrap_or(0);
        candidates.into_iter().nth(chosen)
    }

    pub fn name(&self) -> String {
        match self {
            Metric::RowCount => ROW_COUNT.to_string(),
            Metric::ColumnCount => COLUMN_COUNT.to_string(),
            Metric::Column { column, kind } => format!("{column}{}", kind.suffix()),
        }
    }
}

/// Every accepted metric name, column-bound ones as `<column>_...` patterns.
pub fn valid_metric_names() -> Vec<String> {
    let mut names = vec![ROW_COUNT.to_string(), COLUMN_COUNT.to_string()];
    names.extend(
        COLUMN_SUFFIXES
            .iter()
            .map(|(suffix, _)| format!("<column>{suffix}")),
    );
    names
}

/// Fixed-width time buckets aligned on `origin`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeBucketing {
    pub origin: DateTime<Utc>,
    pub width: Duration,
}

impl TimeBucketing {
    pub fn new(origin: DateTime<Utc>, width: Duration) -> Self {
        TimeBucketing { origin, width }
    }

    pub fn daily(origin: DateTime<Utc>) -> Self {
        TimeBucketing::new(origin, Duration::days(1))
    }

    fn validate(&self) -> Result<()> {
        if self.width.num_milliseconds() <= 0 {
            return Err(ExplorerError::Configuration(format!(
                "time bucket width must be positive, got {}ms",
                self.width.num_milliseconds()
            )));
        }
        Ok(())
    }

    fn bucket_start(&self, ts: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let offset = ts.signed_duration_since(self.origin);
        let start_offset = match (offset.num_nanoseconds(), self.width.num_nanoseconds()) {
            (Some(offset_ns), Some(width_ns)) => {
                Duration::nanoseconds(width_ns.checked_mul(offset_ns.div_euclid(width_ns))?)
            }
            _ => {
                // Offsets beyond ~292 years: millisecond resolution, floored.
                let width_ms = self.width.num_milliseconds();
                let mut offset_ms = offset.num_milliseconds();
                if Duration::try_milliseconds(offset_ms)? > offset {
                    offset_ms -= 1;
                }
                Duration::try_milliseconds(width_ms.checked_mul(offset_ms.div_euclid(width_ms))?)?
            }
        };
        self.origin.checked_add_signed(start_offset)
    }
}

/// Caller-supplied settings some metrics need.
#[derive(Clone, Debug, Default)]
pub struct AggregateOptions {
    pub time_buckets: Option<TimeBucketing>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ValueCount {
    pub value: FieldValue,
    pub count: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct NumericSummary {
    pub count: usize,
    pub sum: f64,
    pub mean: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TimeBucket {
    pub start: DateTime<Utc>,
    pub count: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricValue {
    Count(usize),
    /// Most frequent first; equal counts keep first-seen order.
    Distribution(Vec<ValueCount>),
    Summary(NumericSummary),
    /// Non-empty buckets in ascending start order.
    TimeBuckets(Vec<TimeBucket>),
}

impl MetricValue {
    pub fn as_count(&self) -> Option<usize> {
        match self {
            MetricValue::Count(n) => Some(*n),
            _ => None,
        }
    }
}

/// Metric name to computed value.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct AggregateResult {
    values: BTreeMap<String, MetricValue>,
}

impl AggregateResult {
    pub fn get(&self, metric: &str) -> Option<&MetricValue> {
        self.values.get(metric)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetricValue)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }
}

/// Compute `metrics` over `table` with default options.
pub fn aggregate<I, S>(table: &NormalizedTable, metrics: I) -> Result<AggregateResult>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    aggregate_with(table, metrics, &AggregateOptions::default())
}

/// Compute `metrics` over `table`.
///
/// All names are resolved first; a single unknown name, or a time-bucket
/// metric without a bucketing configuration, fails the request with nothing
/// computed.
pub fn aggregate_with<I, S>(
    table: &NormalizedTable,
    metrics: I,
    options: &AggregateOptions,
) -> Result<AggregateResult>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut resolved = Vec::new();
    for requested in metrics {
        let requested = requested.as_ref();
        let metric =
            Metric::parse(requested, table).ok_or_else(|| ExplorerError::UnknownMetric {
                requested: requested.to_string(),
                valid: valid_metric_names(),
            })?;
        resolved.push((requested.to_string(), metric));
    }

    let needs_buckets = resolved.iter().any(|(_, metric)| {
        matches!(
            metric,
            Metric::Column {
                kind: ColumnMetric::TimeBuckets,
                ..
            }
        )
    });
    let bucketing = if needs_buckets {
        let bucketing = options.time_buckets.ok_or_else(|| {
            ExplorerError::Configuration(
                "time bucket metrics need a bucket origin and width".to_string(),
            )
        })?;
        bucketing.validate()?;
        Some(bucketing)
    } else {
        None
    };

    let mut result = AggregateResult::default();
    for (name, metric) in resolved {
        let value = match &metric {
            Metric::RowCount => MetricValue::Count(table.row_count()),
            Metric::ColumnCount => MetricValue::Count(table.column_count()),
            Metric::Column { column, kind } => column_metric(table, column, *kind, bucketing),
        };
        result.values.insert(name, value);
    }

    debug!(
        "computed {} metrics over {} rows",
        result.len(),
        table.row_count()
    );
    Ok(result)
}

fn column_metric(
    table: &NormalizedTable,
    column: &str,
    kind: ColumnMetric,
    bucketing: Option<TimeBucketing>,
) -> MetricValue {
    let cells: Vec<&Cell> = match table.column(column) {
        Some(cells) => cells.collect(),
        None => Vec::new(),
    };
    let values = cells.into_iter().filter_map(Cell::value);

    match kind {
        ColumnMetric::PresentCount => MetricValue::Count(values.count()),
        ColumnMetric::NullCount => MetricValue::Count(values.filter(|v| v.is_null()).count()),
        ColumnMetric::Distribution => MetricValue::Distribution(distribution(values)),
        ColumnMetric::ItemDistribution => MetricValue::Distribution(distribution(
            values.filter_map(FieldValue::as_list).flatten(),
        )),
        ColumnMetric::NumericSummary => MetricValue::Summary(numeric_summary(values)),
        ColumnMetric::TimeBuckets => {
            let buckets = match bucketing {
                Some(bucketing) => time_buckets(values, &bucketing),
                None => Vec::new(),
            };
            MetricValue::TimeBuckets(buckets)
        }
    }
}

fn distribution<'a>(values: impl Iterator<Item = &'a FieldValue>) -> Vec<ValueCount> {
    let mut counts: Vec<ValueCount> = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();

    for value in values {
        let key = value.distinct_key();
        match seen.get(&key) {
            Some(&index) => counts[index].count += 1,
            None => {
                seen.insert(key, counts.len());
                counts.push(ValueCount {
                    value: value.clone(),
                    count: 1,
                });
            }
        }
    }

    // Stable sort keeps first-seen order among equal counts.
    counts.sort_by(|a, b| b.count.cmp(&a.count));
    counts
}

fn numeric_summary<'a>(values: impl Iterator<Item = &'a FieldValue>) -> NumericSummary {
    let numbers = values.filter_map(|value| match value {
        FieldValue::List(items) => Some(items.len() as f64),
        other => other.as_f64(),
    });

    let mut summary = NumericSummary::default();
    for x in numbers {
        summary.count += 1;
        summary.sum += x;
        summary.min = Some(summary.min.map_or(x, |m| m.min(x)));
        summary.max = Some(summary.max.map_or(x, |m| m.max(x)));
    }
    if summary.count > 0 {
        summary.mean = Some(summary.sum / summary.count as f64);
    }
    summary
}

fn time_buckets<'a>(
    values: impl Iterator<Item = &'a FieldValue>,
    bucketing: &TimeBucketing,
) -> Vec<TimeBucket> {
    let mut counts: BTreeMap<DateTime<Utc>, usize> = BTreeMap::new();
    for ts in values.filter_map(FieldValue::as_timestamp) {
        if let Some(start) = bucketing.bucket_start(ts) {
            *counts.entry(start).or_insert(0) += 1;
        }
    }
    counts
        .into_iter()
        .map(|(start, count)| TimeBucket { start, count })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use crate::record::Record;
    use crate::snapshot::CollectionSnapshot;
    use chrono::TimeZone;

    fn table(records: Vec<Record>) -> NormalizedTable {
        normalize(&CollectionSnapshot::new(Utc::now(), records))
    }

    fn ann_and_bo() -> NormalizedTable {
        table(vec![
            Record::new("u1")
                .with_field("name", "Ann")
                .with_field("age", 30_i64),
            Record::new("u2").with_field("name", "Bo"),
        ])
    }

    #[test]
    fn row_and_present_counts() {
        let table = ann_and_bo();
        let result = aggregate(&table, ["row_count", "age_present_count"]).unwrap();
        assert_eq!(result.get("row_count"), Some(&MetricValue::Count(2)));
        assert_eq!(result.get("age_present_count"), Some(&MetricValue::Count(1)));
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn unknown_metric_fails_whole_request() {
        let table = ann_and_bo();
        let err = aggregate(&table, ["row_count", "median_age"]).unwrap_err();
        match err {
            ExplorerError::UnknownMetric { requested, valid } => {
                assert_eq!(requested, "median_age");
                assert!(valid.contains(&"row_count".to_string()));
                assert!(valid.contains(&"<column>_present_count".to_string()));
            }
            other => panic!("expected UnknownMetric, got {other:?}"),
        }
    }

    #[test]
    fn bare_suffix_is_not_a_metric() {
        let table = ann_and_bo();
        assert!(Metric::parse("_distribution", &table).is_none());
        assert!(aggregate(&table, ["_present_count"]).is_err());
    }

    #[test]
    fn missing_column_yields_zero_and_empty_values() {
        let table = ann_and_bo();
        let options = AggregateOptions {
            time_buckets: Some(TimeBucketing::daily(Utc::now())),
        };
        let result = aggregate_with(
            &table,
            [
                "email_present_count",
                "email_null_count",
                "email_distribution",
                "email_item_distribution",
                "email_numeric_summary",
                "email_time_buckets",
            ],
            &options,
        )
        .unwrap();

        assert_eq!(result.get("email_present_count"), Some(&MetricValue::Count(0)));
        assert_eq!(result.get("email_null_count"), Some(&MetricValue::Count(0)));
        assert_eq!(
            result.get("email_distribution"),
            Some(&MetricValue::Distribution(Vec::new()))
        );
        assert_eq!(
            result.get("email_item_distribution"),
            Some(&MetricValue::Distribution(Vec::new()))
        );
        assert_eq!(
            result.get("email_numeric_summary"),
            Some(&MetricValue::Summary(NumericSummary::default()))
        );
        assert_eq!(
            result.get("email_time_buckets"),
            Some(&MetricValue::TimeBuckets(Vec::new()))
        );
    }

    #[test]
    fn distribution_orders_by_count_then_first_seen() {
        let table = table(vec![
            Record::new("a").with_field("plan", "free"),
            Record::new("b").with_field("plan", "pro"),
            Record::new("c").with_field("plan", "team"),
            Record::new("d").with_field("plan", "pro"),
            Record::new("e").with_field("plan", "free"),
            Record::new("f").with_field("plan", FieldValue::Null),
            Record::new("g"),
        ]);

        let result = aggregate(&table, ["plan_distribution", "plan_null_count"]).unwrap();
        let Some(MetricValue::Distribution(counts)) = result.get("plan_distribution") else {
            panic!("expected a distribution");
        };
        let flat: Vec<(String, usize)> = counts
            .iter()
            .map(|vc| (vc.value.to_string(), vc.count))
            .collect();
        assert_eq!(
            flat,
            vec![
                ("free".to_string(), 2),
                ("pro".to_string(), 2),
                ("team".to_string(), 1),
                ("null".to_string(), 1),
            ]
        );
        assert_eq!(result.get("plan_null_count"), Some(&MetricValue::Count(1)));
    }

    #[test]
    fn distribution_keeps_integer_and_text_apart() {
        let table = table(vec![
            Record::new("a").with_field("age", 30_i64),
            Record::new("b").with_field("age", "30"),
        ]);
        let result = aggregate(&table, ["age_distribution"]).unwrap();
        let Some(MetricValue::Distribution(counts)) = result.get("age_distribution") else {
            panic!("expected a distribution");
        };
        assert_eq!(counts.len(), 2);
    }

    #[test]
    fn item_distribution_counts_list_elements() {
        let recipes = |names: &[&str]| {
            FieldValue::List(names.iter().map(|n| FieldValue::from(*n)).collect())
        };
        let table = table(vec![
            Record::new("a").with_field("cooked", recipes(&["soup", "bread"])),
            Record::new("b").with_field("cooked", recipes(&["bread"])),
            Record::new("c").with_field("cooked", "not a list"),
        ]);

        let result = aggregate(&table, ["cooked_item_distribution"]).unwrap();
        let Some(MetricValue::Distribution(counts)) = result.get("cooked_item_distribution")
        else {
            panic!("expected a distribution");
        };
        assert_eq!(counts[0].value, FieldValue::from("bread"));
        assert_eq!(counts[0].count, 2);
        assert_eq!(counts[1].value, FieldValue::from("soup"));
        assert_eq!(counts.len(), 2);
    }

    #[test]
    fn numeric_summary_skips_non_numbers_and_counts_lists() {
        let table = table(vec![
            Record::new("a").with_field("level", 2_i64),
            Record::new("b").with_field("level", 4.5),
            Record::new("c").with_field("level", "high"),
            Record::new("d").with_field("level", FieldValue::Null),
            Record::new("e").with_field(
                "level",
                FieldValue::List(vec![FieldValue::Integer(1), FieldValue::Integer(2)]),
            ),
        ]);

        let result = aggregate(&table, ["level_numeric_summary"]).unwrap();
        assert_eq!(
            result.get("level_numeric_summary"),
            Some(&MetricValue::Summary(NumericSummary {
                count: 3,
                sum: 8.5,
                mean: Some(8.5 / 3.0),
                min: Some(2.0),
                max: Some(4.5),
            }))
        );
    }

    #[test]
    fn time_buckets_use_caller_origin_and_width() {
        let origin = Utc.with_ymd_and_hms(2021, 7, 1, 0, 0, 0).unwrap();
        let at = |day: u32, hour: u32| Utc.with_ymd_and_hms(2021, 7, day, hour, 0, 0).unwrap();
        let table = table(vec![
            Record::new("a").with_field("created", at(1, 3)),
            Record::new("b").with_field("created", at(1, 23)),
            Record::new("c").with_field("created", at(3, 12)),
            Record::new("d").with_field("created", "2021-07-03"),
            Record::new("e").with_field(
                "created",
                Utc.with_ymd_and_hms(2021, 6, 30, 8, 0, 0).unwrap(),
            ),
        ]);

        let options = AggregateOptions {
            time_buckets: Some(TimeBucketing::daily(origin)),
        };
        let result = aggregate_with(&table, ["created_time_buckets"], &options).unwrap();
        assert_eq!(
            result.get("created_time_buckets"),
            Some(&MetricValue::TimeBuckets(vec![
                TimeBucket {
                    start: Utc.with_ymd_and_hms(2021, 6, 30, 0, 0, 0).unwrap(),
                    count: 1,
                },
                TimeBucket {
                    start: origin,
                    count: 2,
                },
                TimeBucket {
                    start: at(3, 0),
                    count: 1,
                },
            ]))
        );
    }

    #[test]
    fn sub_millisecond_offsets_before_a_boundary_use_the_earlier_bucket() {
        let origin = Utc.with_ymd_and_hms(2021, 7, 1, 0, 0, 0).unwrap();
        let table = table(vec![
            Record::new("a").with_field("created", origin - Duration::microseconds(500)),
            Record::new("b").with_field(
                "created",
                origin + Duration::days(1) - Duration::nanoseconds(1),
            ),
        ]);

        let options = AggregateOptions {
            time_buckets: Some(TimeBucketing::daily(origin)),
        };
        let result = aggregate_with(&table, ["created_time_buckets"], &options).unwrap();
        assert_eq!(
            result.get("created_time_buckets"),
            Some(&MetricValue::TimeBuckets(vec![
                TimeBucket {
                    start: origin - Duration::days(1),
                    count: 1,
                },
                TimeBucket {
                    start: origin,
                    count: 1,
                },
            ]))
        );
    }

    #[test]
    fn far_away_timestamps_still_floor_into_buckets() {
        let origin = Utc.with_ymd_and_hms(2021, 7, 1, 0, 0, 0).unwrap();
        let bucketing = TimeBucketing::daily(origin);
        let far = Utc.with_ymd_and_hms(1500, 3, 1, 0, 0, 0).unwrap() - Duration::microseconds(1);
        assert_eq!(
            bucketing.bucket_start(far),
            Some(Utc.with_ymd_and_hms(1500, 2, 28, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn time_buckets_need_configuration() {
        let table = ann_and_bo();
        assert!(matches!(
            aggregate(&table, ["row_count", "created_time_buckets"]),
            Err(ExplorerError::Configuration(_))
        ));

        let zero_width = AggregateOptions {
            time_buckets: Some(TimeBucketing::new(Utc::now(), Duration::zero())),
        };
        assert!(matches!(
            aggregate_with(&table, ["created_time_buckets"], &zero_width),
            Err(ExplorerError::Configuration(_))
        ));
    }

    #[test]
    fn existing_column_wins_ambiguous_names() {
        let table = table(vec![Record::new("a").with_field("tags_item", "x")]);
        assert_eq!(
            Metric::parse("tags_item_distribution", &table),
            Some(Metric::Column {
                column: "tags_item".to_string(),
                kind: ColumnMetric::Distribution,
            })
        );

        let other = ann_and_bo();
        assert_eq!(
            Metric::parse("tags_item_distribution", &other),
            Some(Metric::Column {
                column: "tags".to_string(),
                kind: ColumnMetric::ItemDistribution,
            })
        );
    }

    #[test]
    fn metric_names_round_trip() {
        let table = ann_and_bo();
        for name in ["row_count", "column_count", "age_numeric_summary", "name_distribution"] {
            assert_eq!(Metric::parse(name, &table).unwrap().name(), name);
        }
    }

    #[test]
    fn empty_request_gives_empty_result() {
        let table = ann_and_bo();
        let result = aggregate(&table, Vec::<String>::new()).unwrap();
        assert!(result.is_empty());
    }
}
