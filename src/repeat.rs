//! # Repeat
//!
//! Module containing structs to represent short tandem repeat regions.
//! [`RepeatRegion`] describes one target locus from the region list,
//! together with the per-region output fragments that workers fill in.
//! [`ReferenceWindow`] holds the reference bases around the locus that
//! projection and flank validation compare against.
use anyhow::{bail, Context, Result};

/// One target repeat region. `start` and `stop` are 1-based inclusive
/// reference coordinates. The raw annotation column is kept verbatim since
/// it is echoed into the `.calls` and `.repeatseq` outputs.
#[derive(Debug)]
pub struct RepeatRegion {
    pub seqname: String,
    pub start: i64,
    pub stop: i64,
    pub unit_length: i64,
    pub unit: String,
    pub purity: f64,
    pub annotation: String,
    pub output: RegionOutput,
}

/// Output fragments for one region. Workers write these in place; the
/// binary concatenates them in input-region order, so output bytes do not
/// depend on the number of worker threads.
#[derive(Debug, Default)]
pub struct RegionOutput {
    pub repeatseq: String,
    pub calls: String,
    pub vcf: String,
}

impl RepeatRegion {
    /// Parse a region from its two columns: a `chr:start-stop` locus and an
    /// `_`-separated annotation whose fields are
    /// `unit_length_<other>_<other>_unit_sequence_purity_...`.
    pub fn from_line(locus: &str, annotation: &str) -> Result<RepeatRegion> {
        let (seqname, range) = locus
            .rsplit_once(':')
            .with_context(|| format!("Region '{locus}' is missing a ':' separator"))?;
        let (start, stop) = range
            .split_once('-')
            .with_context(|| format!("Region '{locus}' is missing a '-' separator"))?;
        let start: i64 = start
            .parse()
            .with_context(|| format!("Invalid start position in region '{locus}'"))?;
        let stop: i64 = stop
            .parse()
            .with_context(|| format!("Invalid stop position in region '{locus}'"))?;
        if start < 1 {
            bail!("Region '{locus}' starts before the first reference base");
        }
        if start > stop {
            bail!("Region '{locus}' has start > stop");
        }

        let fields: Vec<&str> = annotation.split('_').collect();
        if fields.len() < 5 {
            bail!("Annotation for region '{locus}' has fewer than 5 '_'-separated fields");
        }
        let unit_length: i64 = fields[0]
            .parse()
            .with_context(|| format!("Invalid unit length in annotation for '{locus}'"))?;
        if unit_length < 1 {
            bail!("Unit length for region '{locus}' must be at least 1");
        }
        let unit = fields[3].to_ascii_uppercase();
        let purity: f64 = fields[4]
            .parse()
            .with_context(|| format!("Invalid purity in annotation for '{locus}'"))?;
        if !(0.0..=1.0).contains(&purity) {
            bail!("Purity for region '{locus}' is outside [0, 1]");
        }

        Ok(RepeatRegion {
            seqname: seqname.to_string(),
            start,
            stop,
            unit_length,
            unit,
            purity,
            annotation: annotation.to_string(),
            output: RegionOutput::default(),
        })
    }

    pub fn locus(&self) -> String {
        format!("{}:{}-{}", self.seqname, self.start, self.stop)
    }

    /// Number of reference bases spanned by the repeat.
    pub fn center_length(&self) -> i64 {
        self.stop - self.start + 1
    }
}

/// Uppercase reference bases around a repeat. Flanks hold at most the
/// configured flank width and are clipped, not padded, at chromosome ends,
/// so they can be shorter than the projection window's flank width.
#[derive(Debug)]
pub struct ReferenceWindow {
    pub left_flank: String,
    pub center: String,
    pub right_flank: String,
}

impl ReferenceWindow {
    pub fn new(left_flank: String, center: String, right_flank: String) -> Self {
        ReferenceWindow {
            left_flank: left_flank.to_ascii_uppercase(),
            center: center.to_ascii_uppercase(),
            right_flank: right_flank.to_ascii_uppercase(),
        }
    }

    /// The reference base immediately preceding the repeat, used for the
    /// VCF one-base-before convention.
    pub fn preceding_base(&self) -> char {
        self.left_flank.chars().last().unwrap_or('N')
    }
}
