use serde_json::{Value, json};

use crate::aggregate::AggregateResult;
use crate::normalize::{Cell, NormalizedTable};

/// Convert a normalized table to CSV format
///
/// The first column is always `key` (the record key), followed by the table
/// columns in their normalized order. Values are escaped when they contain
/// commas, quotes or line breaks.
///
/// # Arguments
/// * `table` - Reference to the table to convert
///
/// # Returns
/// * `String` - CSV content, one line per record
///
/// # Notes
/// * Absent cells are written as empty fields
/// * Explicit nulls are written as `null`, so the two stay distinguishable
///   as long as no text value is literally `null`
///
/// # Examples
/// ```
/// use chrono::Utc;
/// use user_data_explorer::downloader::to_csv;
/// use user_data_explorer::normalize::normalize;
/// use user_data_explorer::record::Record;
/// use user_data_explorer::snapshot::CollectionSnapshot;
///
/// let snapshot = CollectionSnapshot::new(
///     Utc::now(),
///     vec![Record::new("u1").with_field("name", "Ann, B.")],
/// );
/// let csv = to_csv(&normalize(&snapshot));
/// assert_eq!(csv, "key,name\nu1,\"Ann, B.\"\n");
/// ```
pub fn to_csv(table: &NormalizedTable) -> String {
    let mut csv_content = String::new();

    // Header row with column names
    csv_content.push_str("key");
    for column in table.columns() {
        csv_content.push(',');
        csv_content.push_str(&escape_csv(column));
    }
    csv_content.push('\n');

    // Data rows
    for (key, row) in table.row_keys().iter().zip(table.rows()) {
        csv_content.push_str(&escape_csv(key));
        for cell in row {
            csv_content.push(',');
            if let Cell::Present(value) = cell {
                csv_content.push_str(&escape_csv(&value.to_string()));
            }
        }
        csv_content.push('\n');
    }

    csv_content
}

/// Build the JSON document handed to the presentation layer
///
/// # Arguments
/// * `table` - The normalized table
/// * `result` - Metrics computed over that table
///
/// # Returns
/// * `Value` - `{"columns": [...], "rows": [{"key": .., "cells": [..]}], "metrics": {..}}`
///   where absent cells are `{"absent": true}` and present ones carry their tagged value
pub fn to_json(table: &NormalizedTable, result: &AggregateResult) -> Value {
    let rows: Vec<Value> = table
        .row_keys()
        .iter()
        .zip(table.rows())
        .map(|(key, row)| {
            let cells: Vec<Value> = row
                .iter()
                .map(|cell| match cell {
                    Cell::Absent => json!({ "absent": true }),
                    Cell::Present(value) => json!({ "value": value }),
                })
                .collect();
            json!({ "key": key, "cells": cells })
        })
        .collect();

    json!({
        "columns": table.columns(),
        "rows": rows,
        "metrics": result,
    })
}

fn escape_csv(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
