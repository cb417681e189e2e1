//! # Root for utility functions in `strtype`
//!
//! Miscellaneous helpers shared across the library: path handling for
//! naming outputs and phred-scale math used by the caller and the VCF
//! synthesizer.
use anyhow::{Context, Result};
use std::path::Path;

use crate::cli::Params;

/// Scores written to output files (confidence, QUAL, GL) live on this scale.
pub const MAX_SCORE: f64 = 50.0;

/// Infer a sample name from the filepath of an alignment file
///
/// # Examples
///
/// ```
/// let filepath = "./path/to/alignment.bam";
/// let sample_name = strtype::utils::sample_name_from_path(filepath).unwrap();
///
/// assert_eq!("alignment", sample_name);
/// ```
pub fn sample_name_from_path(filepath: &str) -> Result<String> {
    let context = || format!("Could not infer sample name from path {filepath}");
    let name = Path::new(filepath)
        .file_stem()
        .with_context(context)?
        .to_str()
        .with_context(context)?;

    Ok(String::from(name))
}

/// Derive the basename shared by the `.repeatseq`, `.calls` and `.vcf`
/// output files: the alignment basename plus a fingerprint of the
/// parameters that shape the calls.
pub fn output_prefix(alignment_path: &str, params: &Params) -> Result<String> {
    let stem = sample_name_from_path(alignment_path)?;
    Ok(format!(
        "{stem}.L{}.f{}-{}.q{}.m{}",
        params.flank,
        params.cons_left_flank,
        params.cons_right_flank,
        params.map_quality_min,
        params.ploidy.mode(),
    ))
}

/// Convert a posterior probability into a phred-scaled confidence
/// `-10 * log10(1 - p)`, clamped to `[0, 50]`. A `NaN` input maps to 0.
pub fn phred_confidence(p: f64) -> f64 {
    let score = -10.0 * (1.0 - p).log10();
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, MAX_SCORE)
    }
}

/// Clamp an emitted score (QUAL, GL) to `[0, 50]`.
pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, MAX_SCORE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn confidence_scale() {
        assert_relative_eq!(phred_confidence(0.9), 10.0, epsilon = 1e-9);
        assert_relative_eq!(phred_confidence(0.999), 30.0, epsilon = 1e-9);
    }

    #[test]
    fn confidence_is_capped() {
        assert_eq!(50.0, phred_confidence(1.0));
        assert_eq!(50.0, phred_confidence(1.0 - 1e-12));
        assert_eq!(0.0, phred_confidence(0.0));
        assert_eq!(0.0, phred_confidence(f64::NAN));
    }

    #[test]
    fn scores_are_clamped() {
        assert_eq!(50.0, clamp_score(123.0));
        assert_eq!(0.0, clamp_score(-3.0));
        assert_eq!(42.5, clamp_score(42.5));
    }
}
