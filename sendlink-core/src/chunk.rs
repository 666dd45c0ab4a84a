//! Chunk planning: split a file into fixed-size, sequence-numbered ranges.

/// Default chunk size in bytes. Kept well under typical data-channel message limits.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024; // 16 KiB

/// Largest plaintext chunk either side will produce or accept.
pub const MAX_CHUNK_SIZE: usize = 256 * 1024; // 256 KiB

/// One chunk: sequence number and byte range `[start, end)` within the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkRange {
    pub seq: u64,
    pub start: u64,
    pub end: u64,
}

impl ChunkRange {
    pub fn len(&self) -> usize {
        (self.end - self.start) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Chunk size actually used: 0 selects the default, anything above the max is clamped.
pub fn effective_chunk_size(requested: usize) -> usize {
    if requested == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        requested.min(MAX_CHUNK_SIZE)
    }
}

/// Number of chunks a file of `total_len` bytes splits into.
pub fn chunk_count(total_len: u64, chunk_size: usize) -> u64 {
    total_len.div_ceil(effective_chunk_size(chunk_size) as u64)
}

/// Split a file into chunks by fixed size. Sequence numbers start at 0 and increase by one.
pub fn split_into_chunks(total_len: u64, chunk_size: usize) -> impl Iterator<Item = ChunkRange> {
    let size = effective_chunk_size(chunk_size) as u64;
    let count = total_len.div_ceil(size);
    (0..count).map(move |seq| {
        let start = seq * size;
        ChunkRange {
            seq,
            start,
            end: (start + size).min(total_len),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_chunks() {
        let chunks: Vec<_> = split_into_chunks(100, 30).collect();
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].start, 0);
        assert_eq!(chunks[0].end, 30);
        assert_eq!(chunks[3].seq, 3);
        assert_eq!(chunks[3].start, 90);
        assert_eq!(chunks[3].end, 100);
        assert_eq!(chunks[3].len(), 10);
    }

    #[test]
    fn split_exact_multiple() {
        let chunks: Vec<_> = split_into_chunks(90, 30).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].end, 90);
        assert_eq!(chunk_count(90, 30), 3);
    }

    #[test]
    fn split_single_chunk() {
        let chunks: Vec<_> = split_into_chunks(10, 100).collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start, 0);
        assert_eq!(chunks[0].end, 10);
    }

    #[test]
    fn split_zero_length() {
        assert_eq!(split_into_chunks(0, 30).count(), 0);
        assert_eq!(chunk_count(0, 30), 0);
    }

    #[test]
    fn split_zero_chunk_size_uses_default() {
        let chunks: Vec<_> = split_into_chunks(DEFAULT_CHUNK_SIZE as u64 * 2, 0).collect();
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn oversized_chunk_size_is_clamped() {
        assert_eq!(effective_chunk_size(MAX_CHUNK_SIZE * 4), MAX_CHUNK_SIZE);
        let chunks: Vec<_> = split_into_chunks(MAX_CHUNK_SIZE as u64 + 1, usize::MAX).collect();
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.len() <= MAX_CHUNK_SIZE));
    }

    #[test]
    fn ranges_cover_file_contiguously() {
        let mut next = 0;
        for (i, c) in split_into_chunks(1000, 64).enumerate() {
            assert_eq!(c.seq, i as u64);
            assert_eq!(c.start, next);
            assert!(!c.is_empty());
            next = c.end;
        }
        assert_eq!(next, 1000);
    }
}
