//! I/O for `strtype`: loading the target region list and synthesizing the
//! textual VCF output.
pub mod regions;
pub mod vcf;

pub use regions::load_regions;
