use std::io;
use std::ops::Range;

use bytes::Bytes;

use crate::ReadAt;

/// Merge sorted-or-not byte ranges, coalescing neighbors whose gap is at
/// most `max_gap`. `max_gap == 0` merges only exactly-adjacent ranges.
pub fn merge_ranges(mut ranges: Vec<Range<u64>>, max_gap: u64) -> Vec<Range<u64>> {
    if ranges.is_empty() {
        return Vec::new();
    }

    ranges.sort_unstable_by_key(|r| r.start);
    let mut merged = Vec::with_capacity(ranges.len());

    let mut start_idx = 0;
    let mut end_idx = 1;

    while start_idx < ranges.len() {
        let mut range_end = ranges[start_idx].end;

        while end_idx < ranges.len()
            && ranges[end_idx]
                .start
                .checked_sub(range_end)
                .map(|gap| gap <= max_gap)
                .unwrap_or(true)
        {
            range_end = range_end.max(ranges[end_idx].end);
            end_idx += 1;
        }

        merged.push(ranges[start_idx].start..range_end);
        start_idx = end_idx;
        end_idx += 1;
    }

    merged
}

/// Read a set of byte ranges with neighboring requests coalesced into
/// single reads, then slice the results back out per requested range.
pub fn read_byte_ranges<R: ReadAt>(
    read: &R,
    ranges: Vec<Range<u64>>,
    max_gap: u64,
) -> io::Result<Vec<Bytes>> {
    let merged = merge_ranges(ranges.clone(), max_gap);
    let read_bytes = merged
        .iter()
        .map(|r| read.read_at(r.clone()))
        .collect::<io::Result<Vec<_>>>()?;

    let mut results = Vec::with_capacity(ranges.len());
    for range in ranges {
        let read_idx = merged.partition_point(|mr| mr.start <= range.start) - 1;
        let base = merged[read_idx].start;
        let bytes = &read_bytes[read_idx];
        let start = (range.start - base) as usize;
        let end = (range.end - base) as usize;
        results.push(bytes.slice(start..end.min(bytes.len())));
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_adjacent() {
        let merged = merge_ranges(vec![0..2, 2..8], 0);
        assert_eq!(merged, vec![0..8]);
    }

    #[test]
    fn keeps_gapped_apart() {
        let merged = merge_ranges(vec![0..2, 12..20], 0);
        assert_eq!(merged, vec![0..2, 12..20]);
        let merged = merge_ranges(vec![0..2, 12..20], 10);
        assert_eq!(merged, vec![0..20]);
    }

    #[test]
    fn unsorted_input() {
        let merged = merge_ranges(vec![12..20, 0..2, 2..5], 0);
        assert_eq!(merged, vec![0..5, 12..20]);
    }

    #[test]
    fn slices_back_per_request() {
        let bytes = Bytes::from_static(b"trytoreadthisinmultiplechunks");
        let results = read_byte_ranges(&bytes, vec![5..9, 23..29], 100).unwrap();
        assert_eq!(results, vec![Bytes::from_static(b"read"), Bytes::from_static(b"chunks")]);
    }
}
