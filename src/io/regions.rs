//! Region-list parsing. One tab-separated line per target repeat:
//! a `chr:start-stop` locus and an `_`-separated annotation column.
use anyhow::{Context, Result};
use csv::ReaderBuilder;
use log::{info, warn};
use serde::Deserialize;

use crate::repeat::RepeatRegion;

#[derive(Debug, Deserialize)]
struct RegionRow {
    locus: String,
    annotation: String,
}

/// Read repeat regions from `reader`. Malformed lines are logged and
/// skipped; the region order of the input is preserved.
pub fn read_regions<R: std::io::Read>(reader: R) -> Result<Vec<RepeatRegion>> {
    let mut csv_reader = ReaderBuilder::new()
        .has_headers(false)
        .delimiter(b'\t')
        .flexible(true)
        .from_reader(reader);

    let mut regions = Vec::new();
    for result in csv_reader.deserialize::<RegionRow>() {
        let row = match result {
            Ok(row) => row,
            Err(e) => {
                warn!("Skipping unreadable region line: {e}");
                continue;
            }
        };
        match RepeatRegion::from_line(&row.locus, &row.annotation) {
            Ok(region) => regions.push(region),
            Err(e) => warn!("Skipping region: {e:#}"),
        }
    }

    Ok(regions)
}

/// Read repeat regions from the file at `path`.
pub fn load_regions(path: &str) -> Result<Vec<RepeatRegion>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Could not read region file {path}"))?;
    let regions = read_regions(file)?;
    info!("Read {} repeat regions from {path}", regions.len());

    Ok(regions)
}
