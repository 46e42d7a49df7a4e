//! Order spreadsheet input

use crate::error::{FlowError, Result};
use crate::types::OrderRow;
use calamine::{open_workbook_auto, Data, Reader};
use std::collections::BTreeMap;
use std::path::Path;

/// Read every data row of the sheet (first row is the header).
///
/// Uses `sheet` when given, the first worksheet otherwise. A non-numeric
/// order value is an error; an empty one is kept as NaN so that
/// [`all_orders_positive`] rejects it.
pub fn load_orders(path: &Path, order_column: &str, sheet: Option<&str>) -> Result<Vec<OrderRow>> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|e| FlowError::Spreadsheet(format!("Cannot open {}: {}", path.display(), e)))?;

    let sheet_names = workbook.sheet_names().to_owned();
    let sheet_name = match sheet {
        Some(name) if sheet_names.iter().any(|s| s == name) => name.to_string(),
        Some(name) => {
            return Err(FlowError::Spreadsheet(format!(
                "Sheet '{}' not found in {} (available: {})",
                name,
                path.display(),
                sheet_names.join(", ")
            )));
        }
        None => sheet_names
            .first()
            .cloned()
            .ok_or_else(|| FlowError::Spreadsheet(format!("{} has no worksheet", path.display())))?,
    };

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| FlowError::Spreadsheet(format!("Cannot read sheet '{}': {}", sheet_name, e)))?;

    let mut rows = range.rows();
    let headers: Vec<String> = rows
        .next()
        .ok_or_else(|| FlowError::Spreadsheet(format!("Sheet '{}' has no header row", sheet_name)))?
        .iter()
        .map(|c| cell_string(c).unwrap_or_default())
        .collect();

    let order_index = headers.iter().position(|h| h == order_column).ok_or_else(|| {
        FlowError::Spreadsheet(format!("Column '{}' not found in sheet '{}'", order_column, sheet_name))
    })?;

    let mut orders = Vec::new();
    // 1-based sheet row of the first data row
    let first_data_row = range.start().map_or(0, |(row, _)| row) + 2;
    for (sheet_row, row) in (first_data_row..).zip(rows) {
        if row.iter().all(|c| matches!(c, Data::Empty)) {
            continue;
        }

        let order = match row.get(order_index) {
            None | Some(Data::Empty) => f64::NAN,
            Some(other) => cell_f64(other).ok_or_else(|| {
                FlowError::Spreadsheet(format!(
                    "Row {}: '{}' value {:?} is not numeric",
                    sheet_row,
                    order_column,
                    cell_string(other).unwrap_or_default()
                ))
            })?,
        };

        let fields = headers
            .iter()
            .zip(row.iter())
            .filter(|(header, _)| !header.is_empty())
            .map(|(header, cell)| (header.clone(), cell_string(cell).unwrap_or_default()))
            .collect::<BTreeMap<_, _>>();

        orders.push(OrderRow { index: orders.len(), order, fields });
    }

    log::info!("Loaded {} orders from {} [{}]", orders.len(), path.display(), sheet_name);
    Ok(orders)
}

/// True when every order value is strictly positive
pub fn all_orders_positive(orders: &[OrderRow]) -> bool {
    orders.iter().all(|row| row.order > 0.0)
}

fn cell_string(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty => None,
        Data::String(s) => Some(s.trim().to_string()),
        Data::Float(v) if v.fract() == 0.0 && v.abs() < 1e15 => Some(format!("{}", *v as i64)),
        Data::Float(v) => Some(format!("{v}")),
        Data::Int(v) => Some(format!("{v}")),
        Data::Bool(v) => Some(v.to_string()),
        other => Some(other.to_string()),
    }
}

fn cell_f64(cell: &Data) -> Option<f64> {
    match cell {
        Data::Float(v) => Some(*v),
        Data::Int(v) => Some(*v as f64),
        Data::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
