use std::collections::BTreeSet;
use std::fs::File;
use std::path::{Path, PathBuf};

use glob::glob;
use polars::prelude::*;
use tracing::{debug, info, warn};

use crate::error::{ImputeError, Result};

pub const LINK_ID: &str = "FID_Link_Cnty_Intxn";
pub const STATEFP: &str = "STATEFP";
pub const COUNTYFP: &str = "COUNTYFP";
pub const GEOID: &str = "GEOID";
pub const F_SYSTEM: &str = "F_SYSTEM";
pub const URBAN_CODE: &str = "URBAN_CODE";
pub const URBAN: &str = "URBAN";
pub const THROUGH_LANES: &str = "THROUGH_LANES";
pub const AADT: &str = "AADT";
pub const AADT_MDV: &str = "AADT_MDV";
pub const AADT_HDV: &str = "AADT_HDV";
pub const SHAPE_LENGTH: &str = "Shape_Length";

/// Row-identity column attached at load time; prediction and commit are keyed
/// on it rather than on positions within a partition.
pub const ROW_ID: &str = "row_id";

/// Census urban code sentinel for small urban clusters (population 5,000-49,000).
pub const SMALL_URBAN_CLUSTER_CODE: i64 = 99998;
/// Census urban code sentinel for rural or unmatched sections.
pub const RURAL_CODE: i64 = 99999;

const REQUIRED_COLUMNS: [&str; 12] = [
    LINK_ID,
    STATEFP,
    COUNTYFP,
    GEOID,
    F_SYSTEM,
    URBAN_CODE,
    URBAN,
    THROUGH_LANES,
    AADT,
    AADT_MDV,
    AADT_HDV,
    SHAPE_LENGTH,
];

const F_SYSTEM_DOMAIN: [i64; 7] = [1, 2, 3, 4, 5, 6, 7];
const URBAN_DOMAIN: [i64; 3] = [0, 1, 2];

/// AadtTable owns the canonical table of road-link records. `commit` is the
/// only mutator of the AADT columns; everything else returns subsets.
#[derive(Debug)]
pub struct AadtTable {
    df: DataFrame,
}

impl AadtTable {
    /// Reads the road-link table from a CSV path or glob pattern of CSV parts.
    pub fn load<P: AsRef<Path>>(pattern: P) -> Result<Self> {
        let pattern = pattern.as_ref();
        info!(path = %pattern.display(), "loading road-link table");

        let raw = pattern
            .to_str()
            .ok_or_else(|| ImputeError::DataLoad("input path is not valid UTF-8".to_string()))?;
        let paths: Vec<PathBuf> = glob(raw)
            .map_err(|e| ImputeError::DataLoad(format!("bad input pattern {raw}: {e}")))?
            .filter_map(std::result::Result::ok)
            .collect();
        if paths.is_empty() {
            return Err(ImputeError::DataLoad(format!(
                "no files match pattern: {raw}"
            )));
        }

        let mut merged: Option<DataFrame> = None;
        for path in &paths {
            let part = read_csv(path)?;
            merged = Some(match merged {
                Some(df) => df.vstack(&part)?,
                None => part,
            });
        }
        let df = merged
            .ok_or_else(|| ImputeError::DataLoad(format!("no readable files under {raw}")))?;
        Self::from_frame(df)
    }

    /// Builds the table from an already-read frame, applying the same
    /// normalization as `load`.
    pub fn from_frame(df: DataFrame) -> Result<Self> {
        check_required_columns(&df)?;

        let before = df.height();
        let df = normalize(df)?;
        let dropped = before - df.height();
        if dropped > 0 {
            warn!(dropped, "dropped links violating the positive-length invariant");
        }

        check_domain(&df, F_SYSTEM, &F_SYSTEM_DOMAIN)?;
        check_domain(&df, URBAN, &URBAN_DOMAIN)?;
        check_urban_code(&df)?;

        debug!(rows = df.height(), columns = df.width(), "road-link table ready");
        Ok(Self { df })
    }

    pub fn frame(&self) -> &DataFrame {
        &self.df
    }

    pub fn height(&self) -> usize {
        self.df.height()
    }

    /// Distinct state FIPS codes, in stable sorted order.
    pub fn states(&self) -> Result<Vec<String>> {
        let codes = self.df.column(STATEFP)?.str()?;
        let mut distinct = BTreeSet::new();
        for code in codes.into_iter().flatten() {
            distinct.insert(code.to_string());
        }
        Ok(distinct.into_iter().collect())
    }

    /// All records, or only those for one state. An unknown state yields an
    /// empty frame rather than an error.
    pub fn partition(&self, state: Option<&str>) -> Result<DataFrame> {
        match state {
            Some(fips) => Ok(self
                .df
                .clone()
                .lazy()
                .filter(col(STATEFP).eq(lit(fips)))
                .collect()?),
            None => Ok(self.df.clone()),
        }
    }

    /// Records where the named response field is null.
    pub fn rows_missing(&self, response: &str) -> Result<DataFrame> {
        Ok(self
            .df
            .clone()
            .lazy()
            .filter(col(response).is_null())
            .collect()?)
    }

    /// Records where the named response field is non-null; the complement of
    /// `rows_missing`.
    pub fn rows_labeled(&self, response: &str) -> Result<DataFrame> {
        Ok(self
            .df
            .clone()
            .lazy()
            .filter(col(response).is_not_null())
            .collect()?)
    }

    pub fn missing_count(&self, response: &str) -> Result<usize> {
        Ok(self.df.column(response)?.null_count())
    }

    /// Writes predicted values into the response column at the given row ids.
    /// Only rows that are currently null are filled, so committing never
    /// overwrites a known value and repeating a commit is a no-op. Returns the
    /// number of rows actually written.
    pub fn commit(&mut self, ids: &[IdxSize], response: &str, values: &[f64]) -> Result<usize> {
        if ids.len() != values.len() {
            return Err(ImputeError::Commit(format!(
                "{} row ids but {} values",
                ids.len(),
                values.len()
            )));
        }

        let mut column: Vec<Option<f64>> = self.df.column(response)?.f64()?.into_iter().collect();
        let mut written = 0usize;
        for (&id, &value) in ids.iter().zip(values.iter()) {
            let slot = column
                .get_mut(id as usize)
                .ok_or_else(|| ImputeError::Commit(format!("row id {id} out of range")))?;
            if slot.is_none() {
                *slot = Some(value);
                written += 1;
            }
        }
        self.df.with_column(Series::new(response.into(), column))?;
        Ok(written)
    }

    /// Terminal persistence of the filled table; the row-identity column is
    /// internal and stripped from the output.
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        use anyhow::Context;

        let mut out = self.df.drop(ROW_ID)?;
        let file = File::create(path.as_ref())
            .with_context(|| format!("failed to create {}", path.as_ref().display()))?;
        CsvWriter::new(file).finish(&mut out)?;
        info!(path = %path.as_ref().display(), rows = out.height(), "wrote imputed table");
        Ok(())
    }
}

fn read_csv(path: &Path) -> Result<DataFrame> {
    let file = File::open(path)
        .map_err(|e| ImputeError::DataLoad(format!("{}: {e}", path.display())))?;
    let df = CsvReader::new(file).finish()?;
    debug!(path = %path.display(), rows = df.height(), "read csv part");
    Ok(df)
}

fn check_required_columns(df: &DataFrame) -> Result<()> {
    let present: BTreeSet<&str> = df.get_column_names().iter().map(|s| s.as_str()).collect();
    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|name| !present.contains(name))
        .collect();
    if !missing.is_empty() {
        return Err(ImputeError::DataLoad(format!(
            "input table is missing required columns: {}",
            missing.join(", ")
        )));
    }
    Ok(())
}

/// Re-pads the geographic codes the upstream geodatabase export mangles,
/// applies the FHWA two-lane assumption for absent lane counts, and attaches
/// the row-identity column. Zero-length links are filtered here.
fn normalize(df: DataFrame) -> Result<DataFrame> {
    let out = df
        .lazy()
        .filter(
            col(SHAPE_LENGTH)
                .is_not_null()
                .and(col(SHAPE_LENGTH).gt(lit(0.0))),
        )
        .with_columns([
            col(STATEFP).cast(DataType::String).str().zfill(lit(2)),
            col(COUNTYFP).cast(DataType::String).str().zfill(lit(3)),
            col(GEOID).cast(DataType::String).str().zfill(lit(5)),
            when(
                col(THROUGH_LANES)
                    .is_null()
                    .or(col(THROUGH_LANES).eq(lit(0))),
            )
            .then(lit(2))
            .otherwise(col(THROUGH_LANES))
            .cast(DataType::Int64)
            .alias(THROUGH_LANES),
            col(F_SYSTEM).cast(DataType::Int64),
            col(URBAN).cast(DataType::Int64),
            col(URBAN_CODE).cast(DataType::Int64),
            col(AADT).cast(DataType::Float64),
            col(AADT_MDV).cast(DataType::Float64),
            col(AADT_HDV).cast(DataType::Float64),
            col(SHAPE_LENGTH).cast(DataType::Float64),
        ])
        .sort(vec![STATEFP, COUNTYFP, F_SYSTEM], Default::default())
        .with_row_index(ROW_ID, None)
        .collect()?;
    Ok(out)
}

fn check_domain(df: &DataFrame, name: &str, domain: &[i64]) -> Result<()> {
    let valid = Series::new("domain".into(), domain);
    let bad = df
        .clone()
        .lazy()
        .filter(col(name).is_null().or(col(name).is_in(lit(valid)).not()))
        .collect()?;
    if bad.height() > 0 {
        return Err(ImputeError::DataLoad(format!(
            "column {name} has {} values outside its categorical domain",
            bad.height()
        )));
    }
    Ok(())
}

/// Census urban codes are up to five digits with 99998/99999 reserved for
/// small urban clusters and rural sections.
fn check_urban_code(df: &DataFrame) -> Result<()> {
    let bad = df
        .clone()
        .lazy()
        .filter(
            col(URBAN_CODE)
                .is_null()
                .or(col(URBAN_CODE).lt(lit(1)))
                .or(col(URBAN_CODE).gt(lit(RURAL_CODE))),
        )
        .collect()?;
    if bad.height() > 0 {
        return Err(ImputeError::DataLoad(format!(
            "column {URBAN_CODE} has {} values outside the census code range",
            bad.height()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame() -> DataFrame {
        df!(
            LINK_ID => &[1i64, 2, 3, 4, 5],
            STATEFP => &[50i64, 50, 50, 6, 6],
            COUNTYFP => &[7i64, 7, 19, 37, 37],
            GEOID => &[50007i64, 50007, 50019, 6037, 6037],
            F_SYSTEM => &[1i64, 3, 5, 2, 7],
            URBAN_CODE => &[RURAL_CODE, SMALL_URBAN_CLUSTER_CODE, RURAL_CODE, 51445, 51445],
            URBAN => &[0i64, 2, 0, 1, 1],
            THROUGH_LANES => &[2i64, 0, 4, 6, 2],
            AADT => &[12000.0, 3400.0, 800.0, 98000.0, 4100.0],
            AADT_MDV => &[Some(400.0), None, Some(55.0), Some(2100.0), None],
            AADT_HDV => &[Some(900.0), Some(120.0), None, Some(5400.0), Some(80.0)],
            SHAPE_LENGTH => &[120.5, 88.0, 410.2, 902.7, 64.3],
        )
        .unwrap()
    }

    #[test]
    fn load_normalizes_geographic_codes() {
        let table = AadtTable::from_frame(sample_frame()).unwrap();
        let states = table.states().unwrap();
        assert_eq!(states, vec!["06".to_string(), "50".to_string()]);

        let counties: Vec<String> = table
            .frame()
            .column(COUNTYFP)
            .unwrap()
            .str()
            .unwrap()
            .into_iter()
            .flatten()
            .map(str::to_string)
            .collect();
        assert!(counties.contains(&"007".to_string()));
        assert!(counties.contains(&"037".to_string()));
    }

    #[test]
    fn absent_through_lanes_default_to_two() {
        let table = AadtTable::from_frame(sample_frame()).unwrap();
        let lanes: Vec<i64> = table
            .frame()
            .column(THROUGH_LANES)
            .unwrap()
            .i64()
            .unwrap()
            .into_iter()
            .flatten()
            .collect();
        assert!(lanes.iter().all(|&l| l >= 2));
    }

    #[test]
    fn zero_length_links_are_dropped() {
        let mut frame = sample_frame();
        frame
            .with_column(Series::new(
                SHAPE_LENGTH.into(),
                &[0.0, 88.0, 410.2, 902.7, 64.3],
            ))
            .unwrap();
        let table = AadtTable::from_frame(frame).unwrap();
        assert_eq!(table.height(), 4);
    }

    #[test]
    fn missing_columns_fail_to_load() {
        let frame = sample_frame().drop(AADT_HDV).unwrap();
        let err = AadtTable::from_frame(frame).unwrap_err();
        assert!(matches!(err, ImputeError::DataLoad(_)));
    }

    #[test]
    fn out_of_domain_functional_class_fails_to_load() {
        let mut frame = sample_frame();
        frame
            .with_column(Series::new(F_SYSTEM.into(), &[1i64, 3, 9, 2, 7]))
            .unwrap();
        let err = AadtTable::from_frame(frame).unwrap_err();
        assert!(matches!(err, ImputeError::DataLoad(_)));
    }

    #[test]
    fn missing_and_labeled_rows_conserve_the_table() {
        let table = AadtTable::from_frame(sample_frame()).unwrap();
        for response in [AADT_MDV, AADT_HDV] {
            let missing = table.rows_missing(response).unwrap();
            let labeled = table.rows_labeled(response).unwrap();
            assert_eq!(missing.height() + labeled.height(), table.height());
        }
    }

    #[test]
    fn unknown_state_partition_is_empty_not_an_error() {
        let table = AadtTable::from_frame(sample_frame()).unwrap();
        let partition = table.partition(Some("99")).unwrap();
        assert_eq!(partition.height(), 0);
    }

    #[test]
    fn commit_fills_only_null_rows_and_is_idempotent() {
        let mut table = AadtTable::from_frame(sample_frame()).unwrap();
        let missing = table.rows_missing(AADT_MDV).unwrap();
        let ids: Vec<IdxSize> = missing
            .column(ROW_ID)
            .unwrap()
            .u32()
            .unwrap()
            .into_iter()
            .flatten()
            .collect();
        assert_eq!(ids.len(), 2);

        let before: Vec<Option<f64>> = table
            .frame()
            .column(AADT_MDV)
            .unwrap()
            .f64()
            .unwrap()
            .into_iter()
            .collect();

        let values = vec![77.0; ids.len()];
        let written = table.commit(&ids, AADT_MDV, &values).unwrap();
        assert_eq!(written, 2);
        assert_eq!(table.missing_count(AADT_MDV).unwrap(), 0);

        // Known values untouched.
        let after: Vec<Option<f64>> = table
            .frame()
            .column(AADT_MDV)
            .unwrap()
            .f64()
            .unwrap()
            .into_iter()
            .collect();
        for (b, a) in before.iter().zip(after.iter()) {
            if b.is_some() {
                assert_eq!(b, a);
            }
        }

        // Second commit with the same batch changes nothing.
        let rewritten = table.commit(&ids, AADT_MDV, &values).unwrap();
        assert_eq!(rewritten, 0);
        let again: Vec<Option<f64>> = table
            .frame()
            .column(AADT_MDV)
            .unwrap()
            .f64()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(after, again);
    }

    #[test]
    fn commit_rejects_malformed_batches() {
        let mut table = AadtTable::from_frame(sample_frame()).unwrap();
        let err = table.commit(&[0, 1], AADT_MDV, &[1.0]).unwrap_err();
        assert!(matches!(err, ImputeError::Commit(_)));
        let err = table.commit(&[10_000], AADT_MDV, &[1.0]).unwrap_err();
        assert!(matches!(err, ImputeError::Commit(_)));
    }
}
