//! Chunk building: grouping paragraphs into deliverable units.
//!
//! Re-chunking works from already-built chunks alone. It splits them back
//! into paragraphs on [`PARAGRAPH_SEPARATOR`], which assumes no paragraph
//! contains a blank line. Paragraphs from [`crate::segment`] never do.

use lectern_common::config::{MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};

/// Separator placed between paragraphs inside a chunk.
pub const PARAGRAPH_SEPARATOR: &str = "\n\n";

/// Clamp a requested chunk size into `[1, 50]`.
pub fn clamp_chunk_size(size: usize) -> usize {
    size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE)
}

/// Group paragraphs into chunks of `size` paragraphs each.
pub fn build<S: AsRef<str>>(paragraphs: &[S], size: usize) -> Vec<String> {
    let size = clamp_chunk_size(size);
    paragraphs
        .chunks(size)
        .map(|group| {
            group
                .iter()
                .map(AsRef::as_ref)
                .collect::<Vec<_>>()
                .join(PARAGRAPH_SEPARATOR)
        })
        .collect()
}

/// Recover the flat paragraph sequence from built chunks.
pub fn paragraphs_of(chunks: &[String]) -> Vec<String> {
    chunks
        .iter()
        .flat_map(|chunk| chunk.split(PARAGRAPH_SEPARATOR))
        .filter(|paragraph| !paragraph.is_empty())
        .map(str::to_string)
        .collect()
}

/// Re-chunk existing chunks with a new size.
pub fn rebuild(chunks: &[String], new_size: usize) -> Vec<String> {
    build(&paragraphs_of(chunks), new_size)
}

/// Number of paragraphs carried by the first `count` chunks.
pub fn paragraphs_before(chunks: &[String], count: usize) -> usize {
    chunks
        .iter()
        .take(count)
        .map(|chunk| {
            chunk
                .split(PARAGRAPH_SEPARATOR)
                .filter(|paragraph| !paragraph.is_empty())
                .count()
        })
        .sum()
}
