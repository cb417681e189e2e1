//! # Read projection
//!
//! Projects a mapped read onto the reference window around a repeat using
//! its CIGAR, producing one [`Cell`] per reference position plus a side
//! list of inserted substrings. Downstream code validates the flanks of the
//! projection and extracts the repeat length observed in the read.
use rust_htslib::bam::record::{Cigar, CigarStringView};

/// Hard mismatches end the consecutive flank-match count; placeholder cells
/// are tolerated, but only at this many outermost flank positions.
pub const FLANK_MISMATCH_TOLERANCE: usize = 3;

/// One reference position of a projected read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cell {
    Base(u8),
    /// Base that is immediately followed by an insertion in the read.
    InsertionAnchor(u8),
    Deletion,
    /// Not covered by the read.
    Missing,
    SoftClip,
}

impl Cell {
    /// The read base at this position, if any, normalized to uppercase.
    pub fn base(self) -> Option<u8> {
        match self {
            Cell::Base(b) | Cell::InsertionAnchor(b) => Some(b.to_ascii_uppercase()),
            _ => None,
        }
    }

    /// Cells that carry no read base and no reference base observation.
    fn is_placeholder(self) -> bool {
        matches!(self, Cell::Deletion | Cell::Missing | Cell::SoftClip)
    }

    /// Single-character rendering for the `.repeatseq` report. Insertion
    /// anchors are lowercase, deletions `-`, uncovered positions `x`,
    /// soft-clipped positions `S`.
    pub fn render(self) -> char {
        match self {
            Cell::Base(b) => b.to_ascii_uppercase() as char,
            Cell::InsertionAnchor(b) => b.to_ascii_lowercase() as char,
            Cell::Deletion => '-',
            Cell::Missing => 'x',
            Cell::SoftClip => 'S',
        }
    }
}

/// A read projected onto the window `[region_start - flank, region_stop + flank]`.
#[derive(Debug)]
pub struct Projection {
    cells: Vec<Cell>,
    insertions: Vec<Vec<u8>>,
    flank: usize,
    center_length: usize,
}

impl Projection {
    /// The `flank` cells immediately left of the repeat.
    pub fn pre(&self) -> &[Cell] {
        &self.cells[..self.flank]
    }

    /// The cells spanning the repeat itself.
    pub fn aligned(&self) -> &[Cell] {
        &self.cells[self.flank..self.flank + self.center_length]
    }

    /// The `flank` cells immediately right of the repeat.
    pub fn post(&self) -> &[Cell] {
        &self.cells[self.flank + self.center_length..]
    }

    /// The repeat as observed in the read: aligned bases with captured
    /// insertions spliced back in at their anchors and deletions marked
    /// with `-`. An insertion attaches to the junction right of its anchor
    /// and belongs to the repeat when that junction lies inside the repeat
    /// span; an anchor on the last repeat position hands its insertion to
    /// the right flank.
    pub fn repeat_alignment(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.center_length);
        let mut queue = self.insertions.iter();
        let aligned_start = self.flank;
        let aligned_end = self.flank + self.center_length;

        for (idx, cell) in self.cells.iter().enumerate() {
            let in_repeat = idx >= aligned_start && idx < aligned_end;
            if in_repeat {
                match cell {
                    Cell::Base(_) | Cell::InsertionAnchor(_) => {
                        out.push(cell.base().unwrap_or(b'N'));
                    }
                    Cell::Deletion => out.push(b'-'),
                    Cell::Missing | Cell::SoftClip => {}
                }
            }
            if matches!(cell, Cell::InsertionAnchor(_)) {
                if let Some(insertion) = queue.next() {
                    if idx + 1 >= aligned_start && idx + 1 < aligned_end {
                        out.extend(insertion.iter().map(u8::to_ascii_uppercase));
                    }
                }
            }
        }

        out
    }

    /// Observed allele length: repeat bases in the read, insertions
    /// included, deletions excluded.
    pub fn observed_length(&self) -> i64 {
        self.repeat_alignment()
            .iter()
            .filter(|&&b| b != b'-')
            .count() as i64
    }

    /// Render the full window for the `.repeatseq` report.
    pub fn render(&self) -> String {
        self.cells.iter().map(|c| c.render()).collect()
    }
}

/// Project a read onto the reference window `[region_start - flank,
/// region_stop + flank]` (`region_start`/`region_stop` 1-based inclusive,
/// `read_start` the 0-based alignment start). Returns `None` for spliced
/// alignments (`N` CIGAR op), which are unsupported.
pub fn project(
    cigar: &CigarStringView,
    read_start: i64,
    seq: &[u8],
    region_start: i64,
    region_stop: i64,
    flank: usize,
) -> Option<Projection> {
    let center_length = (region_stop - region_start + 1) as usize;
    let window_length = center_length + 2 * flank;
    let window_start = region_start - 1 - flank as i64;
    let mut cells = vec![Cell::Missing; window_length];
    let mut insertions: Vec<Vec<u8>> = Vec::new();

    let cell_index = |pos: i64| -> Option<usize> {
        if pos >= window_start && pos < window_start + window_length as i64 {
            Some((pos - window_start) as usize)
        } else {
            None
        }
    };

    let mut ref_pos = read_start;
    let mut read_idx: usize = 0;
    let mut seen_match = false;

    for op in cigar.iter() {
        match *op {
            Cigar::Match(n) | Cigar::Equal(n) | Cigar::Diff(n) => {
                for k in 0..n as i64 {
                    if let Some(i) = cell_index(ref_pos + k) {
                        cells[i] = seq
                            .get(read_idx + k as usize)
                            .map_or(Cell::Missing, |&b| Cell::Base(b));
                    }
                }
                ref_pos += i64::from(n);
                read_idx += n as usize;
                seen_match = true;
            }
            Cigar::Ins(n) => {
                // The anchor is the reference base left of the insertion;
                // capture only insertions anchored inside the window.
                if seen_match {
                    if let Some(i) = cell_index(ref_pos - 1) {
                        if let Cell::Base(b) = cells[i] {
                            cells[i] = Cell::InsertionAnchor(b);
                            let end = (read_idx + n as usize).min(seq.len());
                            insertions.push(seq[read_idx.min(end)..end].to_vec());
                        }
                    }
                }
                read_idx += n as usize;
            }
            Cigar::Del(n) => {
                for k in 0..n as i64 {
                    if let Some(i) = cell_index(ref_pos + k) {
                        cells[i] = Cell::Deletion;
                    }
                }
                ref_pos += i64::from(n);
            }
            Cigar::RefSkip(_) => return None,
            Cigar::SoftClip(n) => {
                // A leading soft clip sits left of the alignment start, a
                // trailing one right of the last consumed reference base.
                let clip_start = if seen_match {
                    ref_pos
                } else {
                    ref_pos - i64::from(n)
                };
                for k in 0..n as i64 {
                    if let Some(i) = cell_index(clip_start + k) {
                        cells[i] = Cell::SoftClip;
                    }
                }
                read_idx += n as usize;
            }
            Cigar::HardClip(_) | Cigar::Pad(_) => {}
        }
    }

    Some(Projection {
        cells,
        insertions,
        flank,
        center_length,
    })
}

/// Count consecutive read bases matching the reference in the left flank,
/// starting adjacent to the repeat and moving outward. Placeholder cells
/// (`x`/`S`/`-`) within the outermost [`FLANK_MISMATCH_TOLERANCE`]
/// positions are skipped; any other mismatch ends the count. A reference
/// flank clipped at a chromosome end compares against the innermost cells
/// only, so the count never exceeds the reference flank's length.
pub fn left_flank_matches(pre: &[Cell], reference: &[u8]) -> usize {
    flank_matches(
        pre.iter().rev(),
        reference.iter().rev(),
        pre.len().min(reference.len()),
    )
}

/// Same as [`left_flank_matches`] for the right flank, scanning left to
/// right away from the repeat.
pub fn right_flank_matches(post: &[Cell], reference: &[u8]) -> usize {
    flank_matches(
        post.iter(),
        reference.iter(),
        post.len().min(reference.len()),
    )
}

fn flank_matches<'a>(
    cells: impl Iterator<Item = &'a Cell>,
    reference: impl Iterator<Item = &'a u8>,
    flank_length: usize,
) -> usize {
    let mut matches = 0;
    for (distance, (cell, want)) in cells.zip(reference).enumerate() {
        match cell.base() {
            Some(base) if base == want.to_ascii_uppercase() => matches += 1,
            _ if cell.is_placeholder()
                && distance + FLANK_MISMATCH_TOLERANCE >= flank_length =>
            {
                continue;
            }
            _ => break,
        }
    }

    matches
}
