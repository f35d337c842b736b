//! Response adaptation.
//!
//! Normalizes the two wire shapes served by the remote API into a uniform
//! list of row records plus column descriptors:
//!
//! - **JSON with metadata**: a metadata document (`{name, type}[]`) and a
//!   data document that is either a bare array of objects or an object whose
//!   first array-valued field (in declaration order) holds the rows.
//! - **Table matrix**: a 2-D array whose first row is the header row.

use crate::{
    column::{self, ColumnDescriptor, SourceColumn},
    error::Result,
    Error, ResponseShape,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A normalized row: column name to scalar value.
pub type Row = Map<String, Value>;

/// Output of the adapter, ready for schema materialization and writing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdaptedResponse {
    pub columns: Vec<ColumnDescriptor>,
    pub rows: Vec<Row>,
}

impl AdaptedResponse {
    /// A response carrying no columns and no rows.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Adapt a payload according to the descriptor's declared shape.
///
/// `data` is `None` when the server answered without content.
pub fn adapt(
    shape: ResponseShape,
    metadata: Option<&[SourceColumn]>,
    data: Option<&Value>,
) -> Result<AdaptedResponse> {
    match shape {
        ResponseShape::JsonWithMetadata => {
            let metadata = metadata.ok_or_else(|| {
                Error::InvalidMetadata("no metadata document for JSON response".into())
            })?;
            let data = data.ok_or_else(|| {
                Error::InvalidResponseShape("JSON response has no data document".into())
            })?;
            adapt_json(metadata, data)
        }
        ResponseShape::TableMatrix => adapt_table(data),
    }
}

/// Locate the row-set inside a JSON data document.
pub fn find_row_set(data: &Value) -> Result<&Vec<Value>> {
    match data {
        Value::Array(rows) => Ok(rows),
        Value::Object(fields) => fields
            .values()
            .find_map(Value::as_array)
            .ok_or(Error::NoArrayFound),
        _ => Err(Error::NoArrayFound),
    }
}

/// Adapt a metadata + data document pair.
///
/// Rows are projected onto the declared columns; fields the metadata does
/// not declare are dropped and missing fields become null.
pub fn adapt_json(metadata: &[SourceColumn], data: &Value) -> Result<AdaptedResponse> {
    let columns = column::from_metadata(metadata)?;
    let row_set = find_row_set(data)?;

    let mut rows = Vec::with_capacity(row_set.len());
    for (index, element) in row_set.iter().enumerate() {
        let object = element.as_object().ok_or_else(|| {
            Error::InvalidResponseShape(format!("row {} is not an object", index))
        })?;

        let mut row = Row::with_capacity(columns.len());
        for (declared, column) in metadata.iter().zip(&columns) {
            let value = lookup_field(object, &declared.name, &column.name);
            row.insert(column.name.clone(), to_scalar(value));
        }
        rows.push(row);
    }

    Ok(AdaptedResponse { columns, rows })
}

fn lookup_field<'a>(object: &'a Map<String, Value>, declared: &str, name: &str) -> &'a Value {
    object
        .get(declared)
        .or_else(|| object.get(name))
        .or_else(|| {
            object
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v)
        })
        .unwrap_or(&Value::Null)
}

/// Adapt a table-matrix payload.
///
/// An absent or empty payload is a valid zero-row result.
pub fn adapt_table(payload: Option<&Value>) -> Result<AdaptedResponse> {
    let matrix = match payload {
        None | Some(Value::Null) => return Ok(AdaptedResponse::empty()),
        Some(Value::Array(matrix)) => matrix,
        Some(_) => {
            return Err(Error::InvalidResponseShape(
                "table response is not an array".into(),
            ))
        }
    };

    let Some((header, body)) = matrix.split_first() else {
        return Ok(AdaptedResponse::empty());
    };

    let header = header.as_array().ok_or_else(|| {
        Error::InvalidResponseShape("header row is not an array".into())
    })?;

    let mut names = Vec::with_capacity(header.len());
    for (index, cell) in header.iter().enumerate() {
        match cell {
            Value::Null => return Err(Error::MalformedHeader { index }),
            Value::String(s) => names.push(s.clone()),
            Value::Number(_) | Value::Bool(_) => names.push(cell.to_string()),
            _ => return Err(Error::MalformedHeader { index }),
        }
    }
    let columns = column::from_headers(&names)?;

    let mut rows = Vec::with_capacity(body.len());
    for (offset, element) in body.iter().enumerate() {
        let row_index = offset + 1;
        let values = element.as_array().ok_or_else(|| {
            Error::InvalidResponseShape(format!("row {} is not an array", row_index))
        })?;
        if values.len() != columns.len() {
            return Err(Error::ColumnCountMismatch {
                row: row_index,
                expected: columns.len(),
                got: values.len(),
            });
        }

        let row: Row = columns
            .iter()
            .zip(values)
            .map(|(c, v)| (c.name.clone(), to_scalar(v)))
            .collect();
        rows.push(row);
    }

    Ok(AdaptedResponse { columns, rows })
}

/// Reduce a JSON value to something storable in a single column.
///
/// Nested objects and arrays are kept as their JSON text.
pub fn to_scalar(value: &Value) -> Value {
    match value {
        Value::Array(_) | Value::Object(_) => Value::String(value.to_string()),
        other => other.clone(),
    }
}
