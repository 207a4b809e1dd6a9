//! Page-range chunk planning with overlap.

use serde::Serialize;
use std::ops::RangeInclusive;

/// A contiguous, 1-based page range of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    /// 1-based, dense
    pub number: usize,
    pub start_page: usize,
    pub end_page: usize,
    /// Pages shared with the previous chunk
    pub overlap_pages: usize,
}

impl Chunk {
    pub fn pages(&self) -> RangeInclusive<usize> {
        self.start_page..=self.end_page
    }

    pub fn page_count(&self) -> usize {
        self.end_page - self.start_page + 1
    }
}

/// Split `total_pages` into overlapping chunks of at most `pages_per_chunk` pages.
///
/// Planning stops at the first chunk that reaches the last page, so every chunk
/// contributes at least one page no earlier chunk covered.
pub fn plan_chunks(total_pages: usize, pages_per_chunk: usize, overlap_pages: usize) -> Vec<Chunk> {
    if total_pages == 0 {
        return Vec::new();
    }

    let pages_per_chunk = pages_per_chunk.max(1);
    if total_pages <= pages_per_chunk {
        return vec![Chunk {
            number: 1,
            start_page: 1,
            end_page: total_pages,
            overlap_pages: 0,
        }];
    }

    let overlap = overlap_pages.min(pages_per_chunk - 1);
    let step = pages_per_chunk - overlap;

    let mut chunks = Vec::new();
    let mut start = 1;
    loop {
        let end = (start + pages_per_chunk - 1).min(total_pages);
        chunks.push(Chunk {
            number: chunks.len() + 1,
            start_page: start,
            end_page: end,
            overlap_pages: if chunks.is_empty() { 0 } else { overlap },
        });
        if end == total_pages {
            break;
        }
        start += step;
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_document_single_chunk() {
        let chunks = plan_chunks(3, 4, 1);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].pages(), 1..=3);
        assert_eq!(chunks[0].overlap_pages, 0);
    }

    #[test]
    fn test_exact_fit_single_chunk() {
        let chunks = plan_chunks(4, 4, 1);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].overlap_pages, 0);
    }

    #[test]
    fn test_overlapping_ranges() {
        let chunks = plan_chunks(10, 4, 1);
        let ranges: Vec<_> = chunks.iter().map(|c| (c.start_page, c.end_page)).collect();
        assert_eq!(ranges, vec![(1, 4), (4, 7), (7, 10)]);
        assert_eq!(chunks[0].overlap_pages, 0);
        assert!(chunks[1..].iter().all(|c| c.overlap_pages == 1));
    }

    #[test]
    fn test_last_chunk_clamped() {
        let chunks = plan_chunks(11, 4, 1);
        let last = chunks.last().unwrap();
        assert_eq!(last.end_page, 11);
        assert_eq!((last.start_page, last.end_page), (10, 11));
    }

    #[test]
    fn test_numbers_dense_and_no_empty_chunks() {
        for total in 1..40 {
            for ppc in 1..6 {
                for overlap in 0..ppc + 2 {
                    let chunks = plan_chunks(total, ppc, overlap);
                    assert!(!chunks.is_empty());
                    for (i, chunk) in chunks.iter().enumerate() {
                        assert_eq!(chunk.number, i + 1);
                        assert!(chunk.page_count() >= 1);
                        assert!(chunk.page_count() <= ppc);
                        assert!(chunk.end_page <= total);
                    }
                    assert_eq!(chunks.last().unwrap().end_page, total);
                    // every page covered
                    for page in 1..=total {
                        assert!(chunks.iter().any(|c| c.pages().contains(&page)));
                    }
                }
            }
        }
    }

    #[test]
    fn test_overlap_never_stalls() {
        // Overlap equal to chunk size still advances one page per chunk
        let chunks = plan_chunks(5, 2, 2);
        let starts: Vec<_> = chunks.iter().map(|c| c.start_page).collect();
        assert_eq!(starts, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_empty_document() {
        assert!(plan_chunks(0, 4, 1).is_empty());
    }

    #[test]
    fn test_six_chunks() {
        // 19 pages with 4-page chunks and 1 page overlap
        assert_eq!(plan_chunks(19, 4, 1).len(), 6);
    }
}
