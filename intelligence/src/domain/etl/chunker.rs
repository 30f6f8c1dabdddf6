//! Sliding-window chunker with header replay.

use super::grid::NormalizedGrid;

/// One contiguous window of data rows, `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Ordinal within the job, from 0.
    pub id: u32,
    pub start: usize,
    pub end: usize,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// Window `[start, end)` ranges over `total_rows` rows.
///
/// For all `i >= 1`: `chunk[i].start == chunk[i-1].end - overlap`, every
/// chunk spans at most `window` rows, and the union covers every row.
/// `overlap` is clamped below `window` so the cursor always advances.
pub fn chunk_ranges(total_rows: usize, window: usize, overlap: usize) -> Vec<Chunk> {
    let window = window.max(1);
    let overlap = overlap.min(window - 1);
    let _step = window - overlap;

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut id = 0u32;

    while start < total_rows {
        let end = (start + window).min(total_rows);
        chunks.push(Chunk { id, start, end });
        if end == total_rows {
            break;
        }
        start = end - overlap;
        id += 1;
    }

    chunks
}

/// Render one chunk as a Markdown table with the header replayed.
pub fn render_chunk(grid: &NormalizedGrid, chunk: &Chunk) -> String {
    grid.to_markdown_range(chunk.start, chunk.end)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coverage(chunks: &[Chunk], total: usize) -> Vec<usize> {
        let mut seen = vec![0usize; total];
        for chunk in chunks {
            for row in chunk.start..chunk.end {
                seen[row] += 1;
            }
        }
        seen
    }

    #[test]
    fn test_single_chunk_when_under_window() {
        let chunks = chunk_ranges(100, 250, 40);
        assert_eq!(chunks, vec![Chunk { id: 0, start: 0, end: 100 }]);
    }

    #[test]
    fn test_600_rows_make_three_chunks() {
        let chunks = chunk_ranges(600, 250, 40);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], Chunk { id: 0, start: 0, end: 250 });
        assert_eq!(chunks[1], Chunk { id: 1, start: 210, end: 460 });
        assert_eq!(chunks[2], Chunk { id: 2, start: 420, end: 600 });
    }

    #[test]
    fn test_overlap_contract() {
        let (window, overlap, total) = (250, 40, 1234);
        let chunks = chunk_ranges(total, window, overlap);

        for pair in chunks.windows(2) {
            assert_eq!(pair[1].start, pair[0].end - overlap);
            let intersection = pair[0].end.saturating_sub(pair[1].start);
            assert_eq!(intersection, overlap);
        }
        for chunk in &chunks {
            assert!(chunk.len() <= window);
            assert!(!chunk.is_empty());
        }
    }

    #[test]
    fn test_every_row_covered_and_interior_rows_twice() {
        let (window, overlap, total) = (250, 40, 600);
        let chunks = chunk_ranges(total, window, overlap);
        let seen = coverage(&chunks, total);

        assert!(seen.iter().all(|&count| count >= 1));
        // Rows inside an overlap seam appear in two chunks.
        for row in 210..250 {
            assert_eq!(seen[row], 2, "row {}", row);
        }
    }

    #[test]
    fn test_zero_rows() {
        assert!(chunk_ranges(0, 250, 40).is_empty());
    }

    #[test]
    fn test_degenerate_overlap_is_clamped() {
        // overlap >= window would never advance; the clamp keeps step >= 1.
        let chunks = chunk_ranges(10, 4, 9);
        assert!(chunks.len() < 12);
        let seen = coverage(&chunks, 10);
        assert!(seen.iter().all(|&count| count >= 1));
    }
}
