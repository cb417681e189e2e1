//! Text VCF synthesis. Records are assembled as plain strings so workers
//! can buffer them per region and the binary can concatenate buffers in
//! input order.
use std::collections::HashMap;
use std::fmt::Write;

use crate::genotyping::GenotypeCall;
use crate::utils;

/// The VCF format lines to be included in the header. See [`make_vcf_header`].
const VCF_FORMAT_LINES: &[&str] = &[
    r#"##FORMAT=<ID=GT,Number=1,Type=String,Description="Genotype">"#,
    r#"##FORMAT=<ID=GL,Number=G,Type=Float,Description="Phred-scaled genotype likelihoods">"#,
];

/// The VCF info lines to be included in the header. See [`make_vcf_header`].
const VCF_INFO_LINES: &[&str] = &[
    r#"##INFO=<ID=AL,Number=A,Type=Integer,Description="Called allele length offsets from the reference repeat length">"#,
    r#"##INFO=<ID=DP,Number=1,Type=Integer,Description="Number of reads contributing to genotyping">"#,
    r#"##INFO=<ID=RU,Number=1,Type=String,Description="Repeat unit">"#,
    r#"##INFO=<ID=RL,Number=1,Type=Integer,Description="Repeat length in the reference">"#,
];

/// Calls at or below this confidence do not earn the PASS filter tag.
const FILTER_CONFIDENCE: f64 = 0.8;

/// Construct the VCF header: fileformat, the [`VCF_FORMAT_LINES`] and
/// [`VCF_INFO_LINES`], and the column line carrying the sample name.
pub fn make_vcf_header(sample_name: &str) -> String {
    let mut header = String::from("##fileformat=VCFv4.1\n");
    for line in VCF_FORMAT_LINES {
        header.push_str(line);
        header.push('\n');
    }
    for line in VCF_INFO_LINES {
        header.push_str(line);
        header.push('\n');
    }
    let _ = writeln!(
        header,
        "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\t{sample_name}"
    );

    header
}

/// Locus-level metadata carried into one VCF record.
#[derive(Debug)]
pub struct VcfSite<'a> {
    pub chrom: &'a str,
    /// 1-based start of the repeat; the record is anchored one base earlier.
    pub start: i64,
    pub preceding_base: char,
    pub unit: &'a str,
    pub depth: u32,
    pub reference_length: i64,
}

/// Synthesize one VCF record from the observed repeat alignments of a
/// locus. `candidates` are read-observed repeat sequences over
/// `{A,C,G,T,-}`; `reference` is the repeat in the reference genome.
/// Returns `None` when the locus matches the reference and `emit_all` is
/// not set.
pub fn synthesize_record(
    candidates: &[Vec<u8>],
    reference: &str,
    site: &VcfSite,
    call: &GenotypeCall,
    emit_all: bool,
) -> Option<String> {
    let reference = reference.as_bytes();
    assert!(!reference.is_empty(), "reference repeat must not be empty");

    let stripped: Vec<Vec<u8>> = candidates
        .iter()
        .map(|c| c.iter().copied().filter(|&b| b != b'-').collect())
        .collect();
    if !emit_all && stripped.iter().all(|c| c[..] == reference[..]) {
        return None;
    }

    // one representative per observed length: most frequent sequence,
    // ties resolved towards the lexicographically smaller one
    let mut by_length: HashMap<usize, HashMap<Vec<u8>, u32>> = HashMap::new();
    for candidate in stripped {
        *by_length
            .entry(candidate.len())
            .or_default()
            .entry(candidate)
            .or_insert(0) += 1;
    }
    let mut alts: Vec<Vec<u8>> = by_length
        .into_values()
        .map(|seqs| {
            let mut entries: Vec<(Vec<u8>, u32)> = seqs.into_iter().collect();
            entries.sort_unstable_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
            entries.swap_remove(0).0
        })
        .collect();
    alts.sort_unstable_by_key(Vec::len);
    // the reference-length candidate is represented by the REF column
    alts.retain(|alt| alt.len() != reference.len());

    let (first, second) = call.alleles;
    let allele_index = |length: i64| -> usize {
        if length == site.reference_length {
            return 0;
        }
        alts.iter()
            .position(|alt| alt.len() as i64 == length)
            .map_or(0, |idx| idx + 1)
    };

    let ref_column = format!("{}{}", site.preceding_base, String::from_utf8_lossy(reference));
    let alt_column = if alts.is_empty() {
        String::from(".")
    } else {
        alts.iter()
            .map(|alt| format!("{}{}", site.preceding_base, String::from_utf8_lossy(alt)))
            .collect::<Vec<String>>()
            .join(",")
    };

    // genotype likelihoods in VCF genotype order over {REF} ∪ ALT
    let mut lengths = vec![site.reference_length];
    lengths.extend(alts.iter().map(|alt| alt.len() as i64));
    let mut gl_values = Vec::new();
    for (i, &len_i) in lengths.iter().enumerate() {
        for &len_j in lengths.iter().take(i + 1) {
            let key = (len_j.min(len_i), len_j.max(len_i));
            let value = call.likelihoods.get(&key).copied().unwrap_or(0.0);
            gl_values.push(format!("{:.2}", utils::clamp_score(value)));
        }
    }

    let filter = if call.confidence > FILTER_CONFIDENCE {
        "PASS"
    } else {
        "."
    };

    let mut record = String::new();
    let _ = writeln!(
        record,
        "{}\t{}\t.\t{}\t{}\t{:.2}\t{}\tAL={},{};RU={};DP={};RL={}\tGT:GL\t{}/{}:{}",
        site.chrom,
        site.start - 1,
        ref_column,
        alt_column,
        utils::clamp_score(call.confidence),
        filter,
        first - site.reference_length,
        second - site.reference_length,
        site.unit,
        site.depth,
        site.reference_length,
        allele_index(first),
        allele_index(second),
        gl_values.join(","),
    );

    Some(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genotyping::Likelihoods;

    fn site(start: i64, reference_length: i64) -> VcfSite<'static> {
        VcfSite {
            chrom: "chr1",
            start,
            preceding_base: 'T',
            unit: "AC",
            depth: 20,
            reference_length,
        }
    }

    fn call(alleles: (i64, i64), confidence: f64, likelihoods: Likelihoods) -> GenotypeCall {
        GenotypeCall {
            alleles,
            confidence,
            likelihoods,
        }
    }

    #[test]
    fn heterozygous_insertion_record() {
        let reference = "ACACACACACAC";
        let mut candidates: Vec<Vec<u8>> = Vec::new();
        for _ in 0..10 {
            candidates.push(reference.as_bytes().to_vec());
            candidates.push(b"ACACACACACACAC".to_vec());
        }
        let likelihoods = Likelihoods::from([
            ((12, 12), 1.2),
            ((12, 14), 42.0),
            ((14, 14), 0.5),
        ]);
        let record = synthesize_record(
            &candidates,
            reference,
            &site(100, 12),
            &call((12, 14), 42.0, likelihoods),
            false,
        )
        .unwrap();

        assert_eq!(
            "chr1\t99\t.\tTACACACACACAC\tTACACACACACACAC\t42.00\tPASS\t\
             AL=0,2;RU=AC;DP=20;RL=12\tGT:GL\t0/1:1.20,42.00,0.50\n",
            record
        );
    }

    #[test]
    fn reference_locus_is_silent_without_emit_all() {
        let reference = "ACACAC";
        let candidates = vec![reference.as_bytes().to_vec(); 5];
        let likelihoods = Likelihoods::from([((6, 6), 50.0)]);

        let silent = synthesize_record(
            &candidates,
            reference,
            &site(40, 6),
            &call((6, 6), 50.0, likelihoods.clone()),
            false,
        );
        assert!(silent.is_none());

        let emitted = synthesize_record(
            &candidates,
            reference,
            &site(40, 6),
            &call((6, 6), 50.0, likelihoods),
            true,
        )
        .unwrap();
        assert_eq!(
            "chr1\t39\t.\tTACACAC\t.\t50.00\tPASS\tAL=0,0;RU=AC;DP=20;RL=6\tGT:GL\t0/0:50.00\n",
            emitted
        );
    }

    #[test]
    fn per_length_dedup_is_deterministic() {
        let reference = "ACACAC";
        // two distinct 8-mers: the more frequent one must win
        let candidates = vec![
            b"ACACACGT".to_vec(),
            b"ACACACAC".to_vec(),
            b"ACACACAC".to_vec(),
        ];
        let likelihoods = Likelihoods::from([((8, 8), 40.0), ((6, 8), 10.0), ((6, 6), 2.0)]);
        let record = synthesize_record(
            &candidates,
            reference,
            &site(40, 6),
            &call((8, 8), 40.0, likelihoods),
            false,
        )
        .unwrap();

        assert!(record.contains("\tTACACACAC\t"));
        assert!(record.contains("\t1/1:"));
    }

    #[test]
    fn deletions_are_stripped_from_candidates() {
        let reference = "ACACAC";
        let candidates = vec![b"ACAC--".to_vec(), b"ACAC--".to_vec()];
        let likelihoods = Likelihoods::from([((4, 4), 45.0)]);
        let record = synthesize_record(
            &candidates,
            reference,
            &site(40, 6),
            &call((4, 4), 45.0, likelihoods),
            false,
        )
        .unwrap();

        assert!(record.contains("\tTACACAC\tTACAC\t"));
        assert!(record.contains("AL=-2,-2;"));
        assert!(record.contains("\t1/1:"));
    }

    #[test]
    fn low_confidence_loses_the_pass_tag() {
        let reference = "ACACAC";
        let candidates = vec![b"ACACACAC".to_vec()];
        let likelihoods = Likelihoods::from([((8, 8), 0.4)]);
        let record = synthesize_record(
            &candidates,
            reference,
            &site(40, 6),
            &call((8, 8), 0.4, likelihoods),
            false,
        )
        .unwrap();

        assert!(record.contains("\t0.40\t.\t"));
    }

    #[test]
    fn header_declares_all_fields() {
        let header = make_vcf_header("sample1");
        assert!(header.starts_with("##fileformat=VCFv4.1\n"));
        for id in ["GT", "GL", "AL", "DP", "RU", "RL"] {
            assert!(header.contains(&format!("ID={id},")));
        }
        assert!(header.ends_with("FORMAT\tsample1\n"));
    }
}
