//! # Command line interface for `strtype`
use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;

use crate::{genotyping::Ploidy, utils};

#[derive(Parser)]
#[command(
    name = "strtype",
    author,
    version,
    about = "Bayesian genotyping of short tandem repeats from aligned reads",
    long_about = None
)]
pub struct Cli {
    /// File specifying target repeat regions, one per line:
    /// "chr:start-stop<TAB>unitlen_..._unitseq_purity_..."
    #[arg(short, long)]
    pub regions: String,

    /// Coordinate-sorted, indexed alignment file (BAM)
    #[arg(short, long)]
    pub alignment: String,

    /// Reference genome FASTA; the .fai index is built next to it if missing
    #[arg(short = 'f', long)]
    pub reference: String,

    /// Sample name for the VCF sample column
    #[arg(long)]
    pub sample: Option<String>,

    /// Width of the flank window used for projection and validation
    #[arg(short = 'L', long, default_value_t = 20)]
    pub flank: usize,

    /// Minimum consecutive matching bases in the left flank
    #[arg(long, default_value_t = 3)]
    pub cons_left_flank: usize,

    /// Minimum consecutive matching bases in the right flank
    #[arg(long, default_value_t = 3)]
    pub cons_right_flank: usize,

    /// Drop reads with mapping quality below this value
    #[arg(long, default_value_t = 0)]
    pub map_quality_min: u8,

    /// Drop reads shorter than this; 0 disables the filter
    #[arg(long, default_value_t = 0)]
    pub read_length_min: usize,

    /// Drop reads longer than this; 0 disables the filter
    #[arg(long, default_value_t = 0)]
    pub read_length_max: usize,

    /// Only use reads flagged as properly paired
    #[arg(long, default_value_t = false)]
    pub properly_paired: bool,

    /// Reject multi-mapping reads (XT tag containing 'R')
    #[arg(long, default_value_t = false)]
    pub multi: bool,

    /// Ploidy mode: 1 haploid, 2 diploid
    #[arg(long, default_value_t = 2, value_parser = mode_in_range)]
    pub mode: u8,

    /// Emit VCF records even for loci matching the reference
    #[arg(long, default_value_t = false)]
    pub emit_all: bool,

    /// Also write the per-read .repeatseq report
    #[arg(long, default_value_t = false)]
    pub repeatseq: bool,

    /// Also write the per-region .calls table
    #[arg(long, default_value_t = false)]
    pub calls: bool,

    /// Number of threads to use
    #[arg(long, default_value_t = 1, value_parser = threads_in_range)]
    pub threads: usize,
}

impl Cli {
    pub fn get_sample_name(&self) -> Result<String> {
        if let Some(name) = &self.sample {
            Ok(name.clone())
        } else {
            let name = utils::sample_name_from_path(&self.alignment)?;
            info!("Inferring sample name from filename: {name}");
            Ok(name)
        }
    }

    pub fn params(&self) -> Params {
        Params {
            flank: self.flank,
            cons_left_flank: self.cons_left_flank,
            cons_right_flank: self.cons_right_flank,
            map_quality_min: self.map_quality_min,
            read_length_min: self.read_length_min,
            read_length_max: self.read_length_max,
            properly_paired: self.properly_paired,
            multi: self.multi,
            ploidy: if self.mode == 1 {
                Ploidy::Haploid
            } else {
                Ploidy::Diploid
            },
            emit_all: self.emit_all,
            make_repeatseq_file: self.repeatseq,
            make_calls_file: self.calls,
        }
    }
}

/// Everything the per-region driver needs to know about how to filter
/// reads and shape calls, decoupled from the argument parser.
#[derive(Debug, Clone)]
pub struct Params {
    pub flank: usize,
    pub cons_left_flank: usize,
    pub cons_right_flank: usize,
    pub map_quality_min: u8,
    pub read_length_min: usize,
    pub read_length_max: usize,
    pub properly_paired: bool,
    pub multi: bool,
    pub ploidy: Ploidy,
    pub emit_all: bool,
    pub make_repeatseq_file: bool,
    pub make_calls_file: bool,
}

fn threads_in_range(s: &str) -> Result<usize> {
    let threads = s
        .parse()
        .context("Could not parse value passed to --threads to integer")?;
    if threads < 1 {
        bail!("--threads must be at least 1");
    }
    Ok(threads)
}

fn mode_in_range(s: &str) -> Result<u8> {
    let mode: u8 = s
        .parse()
        .context("Could not parse value passed to --mode to integer")?;
    if !(1..=2).contains(&mode) {
        bail!("--mode must be 1 (haploid) or 2 (diploid)");
    }
    Ok(mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn mode_maps_to_ploidy() {
        let cli = Cli::parse_from([
            "strtype",
            "--regions",
            "r.txt",
            "--alignment",
            "a.bam",
            "--reference",
            "ref.fa",
            "--mode",
            "1",
        ]);
        assert_eq!(Ploidy::Haploid, cli.params().ploidy);
        assert_eq!(20, cli.params().flank);
    }

    #[test]
    fn mode_and_threads_are_validated() {
        assert!(mode_in_range("2").is_ok());
        assert!(mode_in_range("3").is_err());
        assert!(threads_in_range("0").is_err());
        assert!(threads_in_range("8").is_ok());
    }
}
