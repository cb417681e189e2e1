//! # strtype
//!
//! This library serves as the backbone for the `strtype` binary, a Bayesian
//! genotyper for short tandem repeats. Given an indexed reference genome,
//! a coordinate-sorted and indexed alignment file, and a list of annotated
//! repeat regions, it projects every overlapping read onto the reference
//! window around each repeat, validates the projection's flanks, reduces
//! the observed allele lengths to per-length evidence, and ranks genotype
//! hypotheses with a Dirichlet-multinomial likelihood.
pub mod align;
pub mod cli;
pub mod error_profile;
pub mod genotyping;
pub mod io;
pub mod repeat;
pub mod utils;

use anyhow::{bail, Context, Result};
use log::{debug, trace};
use rust_htslib::{
    bam::{self, record::Aux, Read},
    faidx,
};
use std::sync::Arc;

use crate::{
    cli::Params,
    genotyping::{AlleleCount, Evidence, GenotypeCall, LnFactorial},
    io::vcf::VcfSite,
    repeat::{ReferenceWindow, RepeatRegion},
};

/// The main work of `strtype` happens in this `run` function.
/// It is meant to be called from inside a rayon parallel iterator.
/// Each worker opens its own alignment and reference readers, since both
/// are stateful, then walks its contiguous slice of repeat regions and
/// fills the per-region output fragments in place. A region that cannot
/// be processed is logged and reported as a no-call; only reader setup
/// failures abort the worker.
pub fn run(
    regions: &mut [RepeatRegion],
    params: &Params,
    lnfact: &Arc<LnFactorial>,
    alignment: &str,
    reference: &str,
    tidx: usize,
) -> Result<()> {
    trace!("Launching thread {tidx}");

    let mut bam = bam::IndexedReader::from_path(alignment)
        .with_context(|| format!("Error opening alignment {alignment} on thread {tidx}"))?;
    let fasta = faidx::Reader::from_path(reference)
        .with_context(|| format!("Error opening reference {reference} on thread {tidx}"))?;

    for region in regions {
        if let Err(e) = process_region(region, params, lnfact, &mut bam, &fasta) {
            debug!("Skipping locus {}: {e:#}", region.locus());
            no_call_output(region, params);
        }
    }

    trace!("Finished on thread {tidx}");
    Ok(())
}

/// Fetch the reference bases around a repeat: the repeat itself plus up to
/// `flank` bases on each side, clipped at the chromosome ends.
pub fn fetch_reference_window(
    fasta: &faidx::Reader,
    region: &RepeatRegion,
    flank: usize,
) -> Result<ReferenceWindow> {
    let start0 = (region.start - 1) as usize;
    let stop0 = (region.stop - 1) as usize;

    let center = fasta
        .fetch_seq_string(&region.seqname, start0, stop0)
        .with_context(|| format!("Error fetching reference sequence for {}", region.locus()))?;
    if center.len() as i64 != region.center_length() {
        bail!(
            "Region {} extends beyond the end of {}",
            region.locus(),
            region.seqname
        );
    }

    let left = if start0 == 0 {
        String::new()
    } else {
        fasta
            .fetch_seq_string(&region.seqname, start0.saturating_sub(flank), start0 - 1)
            .unwrap_or_default()
    };
    let right = fasta
        .fetch_seq_string(&region.seqname, stop0 + 1, stop0 + flank)
        .unwrap_or_default();

    Ok(ReferenceWindow::new(left, center, right))
}

/// Drive one region: fetch its reference window, project and filter the
/// overlapping reads, aggregate evidence, call the genotype, and render
/// the `.repeatseq`, `.calls` and `.vcf` fragments.
fn process_region(
    region: &mut RepeatRegion,
    params: &Params,
    lnfact: &LnFactorial,
    bam: &mut bam::IndexedReader,
    fasta: &faidx::Reader,
) -> Result<()> {
    let window = fetch_reference_window(fasta, region, params.flank)?;

    bam.fetch((region.seqname.as_str(), region.start - 1, region.stop - 1))
        .with_context(|| format!("Error fetching reads for {}", region.locus()))?;

    let mut evidence = Evidence::default();
    let mut num_stars: u32 = 0;
    let mut candidates: Vec<Vec<u8>> = Vec::new();
    let mut read_lines: Vec<String> = Vec::new();
    let mut record = bam::Record::new();

    while let Some(result) = bam.read(&mut record) {
        if let Err(e) = result {
            debug!("Skipping faulty read at {}: {e}", region.locus());
            continue;
        }
        let cigar = record.cigar();
        if cigar.is_empty() {
            num_stars += 1;
            continue;
        }
        if record.is_unmapped() || !passes_filters(&record, params) {
            continue;
        }

        let seq = record.seq().as_bytes();
        let Some(projection) = align::project(
            &cigar,
            record.pos(),
            &seq,
            region.start,
            region.stop,
            params.flank,
        ) else {
            // spliced alignment
            continue;
        };

        let left = align::left_flank_matches(projection.pre(), window.left_flank.as_bytes());
        let right = align::right_flank_matches(projection.post(), window.right_flank.as_bytes());
        if left < params.cons_left_flank || right < params.cons_right_flank {
            continue;
        }

        let alignment = projection.repeat_alignment();
        let length = alignment.iter().filter(|&&b| b != b'-').count() as i64;
        let avg_quality = average_base_quality(record.qual());
        evidence.record(length, avg_quality, left.min(right), record.is_reverse());

        if params.make_repeatseq_file {
            read_lines.push(format!(
                "{} {} {:.3} {} {} {}\n",
                projection.render(),
                String::from_utf8_lossy(record.qname()),
                avg_quality,
                record.mapq(),
                if record.is_reverse() { '-' } else { '+' },
                length,
            ));
        }
        candidates.push(alignment);
    }

    let depth = evidence.total_reads();
    let alleles = evidence.finalize();
    let call = decide_genotype(&alleles, depth, region, params, lnfact);

    if params.make_calls_file {
        region.output.calls = match &call {
            Some(call) => format!(
                "{}\t{}\t{}\t{:.2}\n",
                region.locus(),
                region.annotation,
                call.genotype_string(),
                call.confidence
            ),
            None => format!("{}\t{}\tNA\tNA\n", region.locus(), region.annotation),
        };
    }

    if params.make_repeatseq_file {
        let mut block = format!(
            "~{} {} REF:{} DP:{} S:{} GT:{} L:{}\n",
            region.locus(),
            region.annotation,
            region.center_length(),
            depth,
            num_stars,
            call.as_ref()
                .map_or_else(|| String::from("NA"), GenotypeCall::genotype_string),
            call.as_ref()
                .map_or_else(|| String::from("NA"), |c| format!("{:.2}", c.confidence)),
        );
        for line in &read_lines {
            block.push_str(line);
        }
        region.output.repeatseq = block;
    }

    if let Some(call) = &call {
        let site = VcfSite {
            chrom: &region.seqname,
            start: region.start,
            preceding_base: window.preceding_base(),
            unit: &region.unit,
            depth,
            reference_length: region.center_length(),
        };
        if let Some(vcf_record) =
            io::vcf::synthesize_record(&candidates, &window.center, &site, call, params.emit_all)
        {
            region.output.vcf = vcf_record;
        }
    }

    Ok(())
}

/// Apply the region-level short-circuits around the hypothesis caller:
/// degenerate evidence and low-confidence calls become no-calls, and a
/// near-unanimous allele skips enumeration entirely.
fn decide_genotype(
    alleles: &[AlleleCount],
    depth: u32,
    region: &RepeatRegion,
    params: &Params,
    lnfact: &LnFactorial,
) -> Option<GenotypeCall> {
    if genotyping::evidence_is_degenerate(alleles) {
        return None;
    }

    let top = &alleles[0];
    if top.count >= 2
        && genotyping::concordance(top.count, depth) >= genotyping::CONCORDANCE_SHORTCUT
    {
        return Some(GenotypeCall::confident_homozygote(top.length));
    }

    let call = genotyping::call_genotype(
        alleles,
        region.center_length(),
        region.unit_length,
        params.ploidy,
        lnfact,
    )?;
    if call.confidence <= genotyping::MIN_CONFIDENCE {
        return None;
    }

    Some(call)
}

/// Minimal no-call fragments for a region that could not be processed.
fn no_call_output(region: &mut RepeatRegion, params: &Params) {
    if params.make_calls_file {
        region.output.calls = format!("{}\t{}\tNA\tNA\n", region.locus(), region.annotation);
    }
    if params.make_repeatseq_file {
        region.output.repeatseq = format!(
            "~{} {} REF:{} DP:0 S:0 GT:NA L:NA\n",
            region.locus(),
            region.annotation,
            region.center_length()
        );
    }
}

fn passes_filters(record: &bam::Record, params: &Params) -> bool {
    if record.mapq() < params.map_quality_min {
        return false;
    }
    let read_length = record.seq_len();
    if params.read_length_min > 0 && read_length < params.read_length_min {
        return false;
    }
    if params.read_length_max > 0 && read_length > params.read_length_max {
        return false;
    }
    if params.properly_paired && !record.is_proper_pair() {
        return false;
    }
    if params.multi && is_repetitive_hit(record) {
        return false;
    }

    true
}

/// BWA marks reads placed into repetitive regions with `XT:A:R`.
fn is_repetitive_hit(record: &bam::Record) -> bool {
    match record.aux(b"XT") {
        Ok(Aux::Char(c)) => c == b'R',
        Ok(Aux::String(s)) => s.contains('R'),
        _ => false,
    }
}

/// Mean per-base probability of a correct call over the whole read.
/// Reads without quality values pass as high quality.
fn average_base_quality(qualities: &[u8]) -> f64 {
    if qualities.is_empty() {
        return 1.0;
    }
    let sum: f64 = qualities
        .iter()
        .map(|&q| 1.0 - 10f64.powf(-f64::from(q) / 10.0))
        .sum();

    sum / qualities.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genotyping::Ploidy;
    use approx::assert_relative_eq;

    fn test_params() -> Params {
        Params {
            flank: 20,
            cons_left_flank: 3,
            cons_right_flank: 3,
            map_quality_min: 0,
            read_length_min: 0,
            read_length_max: 0,
            properly_paired: false,
            multi: false,
            ploidy: Ploidy::Diploid,
            emit_all: false,
            make_repeatseq_file: true,
            make_calls_file: true,
        }
    }

    fn test_region() -> RepeatRegion {
        RepeatRegion::from_line("chr1:100-111", "2_6_12.0_AC_0.98").unwrap()
    }

    fn allele(length: i64, count: u32) -> AlleleCount {
        AlleleCount {
            length,
            count,
            sum_base_quality: 0.99 * f64::from(count),
            sum_min_flank: 20 * u64::from(count),
            reverse_count: count / 2,
        }
    }

    #[test]
    fn base_quality_averaging() {
        assert_relative_eq!(average_base_quality(&[20]), 0.99, epsilon = 1e-12);
        assert_relative_eq!(average_base_quality(&[20, 20]), 0.99, epsilon = 1e-12);
        assert_eq!(1.0, average_base_quality(&[]));
        assert_relative_eq!(average_base_quality(&[0]), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn unanimous_evidence_short_circuits() {
        let lnfact = LnFactorial::new();
        let alleles = vec![allele(12, 20)];
        let call = decide_genotype(&alleles, 20, &test_region(), &test_params(), &lnfact).unwrap();

        assert_eq!((12, 12), call.alleles);
        assert_eq!(utils::MAX_SCORE, call.confidence);
    }

    #[test]
    fn degenerate_evidence_yields_no_call() {
        let lnfact = LnFactorial::new();
        let params = test_params();
        let region = test_region();

        assert!(decide_genotype(&[], 0, &region, &params, &lnfact).is_none());

        let absurd = vec![allele(10, 12_000)];
        assert!(decide_genotype(&absurd, 12_000, &region, &params, &lnfact).is_none());

        let noisy: Vec<AlleleCount> = (8..18).map(|l| allele(l, 1)).collect();
        assert!(decide_genotype(&noisy, 10, &region, &params, &lnfact).is_none());
    }

    #[test]
    fn balanced_split_survives_the_shortcuts() {
        let lnfact = LnFactorial::new();
        let alleles = vec![allele(14, 10), allele(12, 10)];
        let call = decide_genotype(&alleles, 20, &test_region(), &test_params(), &lnfact).unwrap();

        assert_eq!((12, 14), call.alleles);
        assert!(call.confidence > genotyping::MIN_CONFIDENCE);
    }

    #[test]
    fn no_call_fragments_cover_all_outputs() {
        let mut region = test_region();
        no_call_output(&mut region, &test_params());

        assert_eq!(
            "chr1:100-111\t2_6_12.0_AC_0.98\tNA\tNA\n",
            region.output.calls
        );
        assert!(region.output.repeatseq.starts_with("~chr1:100-111 "));
        assert!(region.output.repeatseq.contains("GT:NA L:NA"));
        assert!(region.output.vcf.is_empty());
    }
}
