use thiserror::Error;

/// Alignment metadata carried by SAM records. The reference sequence is
/// derived lazily from CIGAR + MD so unmapped reads never pay for it.
#[derive(Clone, Debug)]
pub struct AlignInfo {
    pub mapped: bool,
    pub reverse: bool,
    pub cigar: String,
    pub md: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Record {
    pub seq: Vec<u8>,
    pub qual: Vec<u8>,
    pub align: Option<AlignInfo>,
}

impl Record {
    pub fn unaligned(seq: Vec<u8>, qual: Vec<u8>) -> Self {
        Self {
            seq,
            qual,
            align: None,
        }
    }

    pub fn aligned(seq: Vec<u8>, qual: Vec<u8>, align: AlignInfo) -> Self {
        Self {
            seq,
            qual,
            align: Some(align),
        }
    }

    pub fn is_aligned(&self) -> bool {
        self.align.is_some()
    }

    pub fn mapped(&self) -> bool {
        self.align.as_ref().is_some_and(|a| a.mapped)
    }

    pub fn reverse(&self) -> bool {
        self.align.as_ref().is_some_and(|a| a.reverse)
    }

    /// Reconstruct the reference sequence aligned base-for-base with
    /// `seq` (sequencing orientation is the caller's concern). Inserted
    /// and soft-clipped read bases get their own base back, so they can
    /// never register as mismatches.
    pub fn reference(&self) -> Result<Vec<u8>, MdError> {
        let align = self.align.as_ref().ok_or(MdError::MissingTag)?;
        let md = align.md.as_deref().ok_or(MdError::MissingTag)?;
        derive_reference(&self.seq, &align.cigar, md)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum MdError {
    #[error("record carries no MD tag")]
    MissingTag,
    #[error("unparseable CIGAR string")]
    BadCigar,
    #[error("MD tag inconsistent with read length")]
    BadMd,
}

/// Read indexes consumed by an alignment match operation (M/=/X), in
/// read order. Insertions and soft clips consume the read but are not
/// described by MD; deletions consume only the reference.
fn aligned_indexes(seq_len: usize, cigar: &str) -> Result<Vec<usize>, MdError> {
    if cigar.is_empty() || cigar == "*" {
        return Err(MdError::BadCigar);
    }
    let mut aligned = Vec::with_capacity(seq_len);
    let mut read_pos = 0usize;
    let mut num = 0usize;
    let mut saw_digit = false;
    for c in cigar.bytes() {
        if c.is_ascii_digit() {
            num = num
                .checked_mul(10)
                .and_then(|n| n.checked_add((c - b'0') as usize))
                .ok_or(MdError::BadCigar)?;
            saw_digit = true;
            continue;
        }
        if !saw_digit {
            return Err(MdError::BadCigar);
        }
        match c {
            b'M' | b'=' | b'X' => {
                for _ in 0..num {
                    aligned.push(read_pos);
                    read_pos += 1;
                }
            }
            b'I' | b'S' => read_pos += num,
            b'D' | b'N' | b'H' | b'P' => {}
            _ => return Err(MdError::BadCigar),
        }
        num = 0;
        saw_digit = false;
    }
    if saw_digit || read_pos != seq_len {
        return Err(MdError::BadCigar);
    }
    Ok(aligned)
}

pub fn derive_reference(seq: &[u8], cigar: &str, md: &str) -> Result<Vec<u8>, MdError> {
    let aligned = aligned_indexes(seq.len(), cigar)?;
    let mut reference = seq.to_vec();
    let mut next = 0usize;

    let bytes = md.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        let b = bytes[i];
        if b.is_ascii_digit() {
            let mut run = 0usize;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                run = run
                    .checked_mul(10)
                    .and_then(|n| n.checked_add((bytes[i] - b'0') as usize))
                    .ok_or(MdError::BadMd)?;
                i += 1;
            }
            next = next.checked_add(run).ok_or(MdError::BadMd)?;
            if next > aligned.len() {
                return Err(MdError::BadMd);
            }
        } else if b == b'^' {
            // Deleted reference bases: present in MD, absent from the read.
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_uppercase() {
                i += 1;
            }
            if i == start {
                return Err(MdError::BadMd);
            }
        } else if b.is_ascii_uppercase() {
            let idx = *aligned.get(next).ok_or(MdError::BadMd)?;
            reference[idx] = b;
            next += 1;
            i += 1;
        } else {
            return Err(MdError::BadMd);
        }
    }
    Ok(reference)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(seq: &str, cigar: &str, md: &str) -> Record {
        Record::aligned(
            seq.as_bytes().to_vec(),
            vec![b'I'; seq.len()],
            AlignInfo {
                mapped: true,
                reverse: false,
                cigar: cigar.to_string(),
                md: Some(md.to_string()),
            },
        )
    }

    #[test]
    fn substitution_recovers_reference_base() {
        let r = rec("ACGT", "4M", "1T2");
        assert_eq!(r.reference().unwrap(), b"ATGT".to_vec());
    }

    #[test]
    fn all_match_reference_equals_read() {
        let r = rec("ACGT", "4M", "4");
        assert_eq!(r.reference().unwrap(), b"ACGT".to_vec());
    }

    #[test]
    fn deletion_consumes_md_but_not_read() {
        let r = rec("ACGT", "2M1D2M", "2^A2");
        assert_eq!(r.reference().unwrap(), b"ACGT".to_vec());
    }

    #[test]
    fn insertion_skips_read_bases() {
        // Read base 2 is inserted; MD only spans the three aligned bases.
        let r = rec("ACGT", "2M1I1M", "1G1");
        assert_eq!(r.reference().unwrap(), b"AGGT".to_vec());
    }

    #[test]
    fn soft_clip_is_not_compared() {
        let r = rec("ACGT", "1S3M", "1A1");
        assert_eq!(r.reference().unwrap(), b"ACAT".to_vec());
    }

    #[test]
    fn md_overrunning_read_is_rejected() {
        assert_eq!(rec("ACGT", "4M", "10").reference(), Err(MdError::BadMd));
        assert_eq!(rec("ACGT", "4M", "3TT").reference(), Err(MdError::BadMd));
    }

    #[test]
    fn bad_cigar_is_rejected() {
        assert_eq!(rec("ACGT", "*", "4").reference(), Err(MdError::BadCigar));
        assert_eq!(rec("ACGT", "4Q", "4").reference(), Err(MdError::BadCigar));
        assert_eq!(rec("ACGT", "3M", "3").reference(), Err(MdError::BadCigar));
    }

    #[test]
    fn missing_md_is_reported() {
        let mut r = rec("ACGT", "4M", "4");
        r.align.as_mut().unwrap().md = None;
        assert_eq!(r.reference(), Err(MdError::MissingTag));
    }
}
