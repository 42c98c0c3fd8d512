//! Merged model + user annotation table and its CSV export.

use std::io::Write;

use log::{debug, info};

use crate::crs::Crs;
use crate::detection::{Detection, Provenance};
use crate::error::{GeoError, Result};

/// Columns every detection table has, in output order.
pub const BASE_COLUMNS: [&str; 8] = ["xmin", "ymin", "xmax", "ymax", "label", "score", "geometry", "area_m2"];
pub const PROVENANCE_COLUMN: &str = "labelled_by";
pub const IMAGE_COLUMN: &str = "image_path";

/// Detection rows sharing one column set.
///
/// The column set is [`BASE_COLUMNS`] followed by the attribute keys of the
/// rows, which must be identical for every row and must not reuse a fixed
/// column name.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionTable {
    columns: Vec<String>,
    rows: Vec<Detection>,
}

impl DetectionTable {
    pub fn new(rows: Vec<Detection>) -> Result<Self> {
        let attr_keys: Vec<String> = rows
            .first()
            .map(|r| r.attributes().keys().cloned().collect())
            .unwrap_or_default();
        if let Some(key) = attr_keys.iter().find(|k| is_reserved_column(k)) {
            return Err(GeoError::SchemaMismatch {
                expected: reserved_columns().map(str::to_string).collect(),
                found: vec![format!("attribute {key:?}")],
            });
        }
        for (i, row) in rows.iter().enumerate() {
            if !row.attributes().keys().eq(attr_keys.iter()) {
                debug!("row {i} breaks the table schema");
                return Err(GeoError::SchemaMismatch {
                    expected: attr_keys,
                    found: row.attributes().keys().cloned().collect(),
                });
            }
        }
        let columns = BASE_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .chain(attr_keys)
            .collect();
        Ok(Self { columns, rows })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Detection] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn reserved_columns() -> impl Iterator<Item = &'static str> {
    BASE_COLUMNS.into_iter().chain([PROVENANCE_COLUMN, IMAGE_COLUMN])
}

fn is_reserved_column(name: &str) -> bool {
    reserved_columns().any(|c| c == name)
}

/// Final annotation set: model rows, then user rows, all stamped with the
/// source image reference.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationTable {
    columns: Vec<String>,
    rows: Vec<Detection>,
    source_image_ref: String,
}

impl AnnotationTable {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Detection] {
        &self.rows
    }

    pub fn source_image_ref(&self) -> &str {
        &self.source_image_ref
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn count(&self, provenance: Provenance) -> usize {
        self.rows.iter().filter(|r| r.provenance() == provenance).count()
    }

    /// Write the table as CSV with a header row.
    ///
    /// `score` is empty for user rows; `geometry` is WKT in the rows' CRS.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(&self.columns)?;

        for row in &self.rows {
            let bbox = row.bbox();
            let mut record: Vec<String> = Vec::with_capacity(self.columns.len());
            for column in &self.columns {
                let field = match column.as_str() {
                    "xmin" => bbox.xmin().to_string(),
                    "ymin" => bbox.ymin().to_string(),
                    "xmax" => bbox.xmax().to_string(),
                    "ymax" => bbox.ymax().to_string(),
                    "label" => row.label().to_string(),
                    "score" => row.score().map(|s| s.to_string()).unwrap_or_default(),
                    "geometry" => row.geometry().to_wkt(),
                    "area_m2" => format!("{:.3}", row.area_m2()),
                    PROVENANCE_COLUMN => row.provenance().to_string(),
                    IMAGE_COLUMN => self.source_image_ref.clone(),
                    other => row.attributes().get(other).cloned().unwrap_or_default(),
                };
                record.push(field);
            }
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

/// Union model and user detections into one table.
///
/// Each side is tagged with its provenance first (user rows lose any score).
/// The two column sets, and the CRS of their geometries, must match.
pub fn merge(model: DetectionTable, user: DetectionTable, source_image_ref: &str) -> Result<AnnotationTable> {
    let mut model_cols = model.columns.clone();
    let mut user_cols = user.columns.clone();
    model_cols.push(PROVENANCE_COLUMN.to_string());
    user_cols.push(PROVENANCE_COLUMN.to_string());

    let mut model_sorted = model_cols.clone();
    let mut user_sorted = user_cols.clone();
    model_sorted.sort();
    user_sorted.sort();
    if model_sorted != user_sorted {
        return Err(GeoError::SchemaMismatch {
            expected: model_cols,
            found: user_cols,
        });
    }
    let mut all_crs: Vec<Crs> = model
        .rows
        .iter()
        .chain(user.rows.iter())
        .map(|r| r.geometry().crs())
        .collect();
    all_crs.sort_by_key(|c| c.epsg());
    all_crs.dedup();
    if all_crs.len() > 1 {
        return Err(GeoError::SchemaMismatch {
            expected: vec![format!("geometry ({})", all_crs[0])],
            found: all_crs[1..].iter().map(|c| format!("geometry ({c})")).collect(),
        });
    }

    let (n_model, n_user) = (model.len(), user.len());
    let rows: Vec<Detection> = model
        .rows
        .into_iter()
        .map(|r| r.tagged(Provenance::Model))
        .chain(user.rows.into_iter().map(|r| r.tagged(Provenance::User)))
        .collect();

    let mut columns = model_cols;
    columns.push(IMAGE_COLUMN.to_string());
    info!("merged {n_model} model + {n_user} user annotation(s) for {source_image_ref}");
    Ok(AnnotationTable {
        columns,
        rows,
        source_image_ref: source_image_ref.to_string(),
    })
}
