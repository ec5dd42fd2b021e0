//! Token-bounded chunking.
//!
//! Splits an ordered list of text units into batches whose estimated token
//! cost stays under a budget. Units are never split, dropped or reordered.

use crate::models::{Conversation, MessageUnit, TimeSegment};
use tracing::debug;

/// Something with a measurable text size.
pub trait ChunkUnit {
    /// Length of the unit's rendered text, in characters.
    fn char_len(&self) -> usize;
}

impl ChunkUnit for String {
    fn char_len(&self) -> usize {
        self.chars().count()
    }
}

impl ChunkUnit for &str {
    fn char_len(&self) -> usize {
        self.chars().count()
    }
}

impl ChunkUnit for MessageUnit {
    fn char_len(&self) -> usize {
        self.to_line().chars().count()
    }
}

impl ChunkUnit for Conversation {
    fn char_len(&self) -> usize {
        self.transcript().chars().count()
    }
}

impl ChunkUnit for TimeSegment {
    fn char_len(&self) -> usize {
        self.render().chars().count()
    }
}

/// Estimate the token cost of `chars` characters.
///
/// Rounds up so that any non-empty unit costs at least one token.
pub fn estimate_tokens(chars: usize, chars_per_token: usize) -> usize {
    chars.div_ceil(chars_per_token.max(1))
}

/// An ordered slice of the input that fits the token budget (unless it
/// holds a single oversized unit).
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk<T> {
    /// Position of the chunk in the chunking pass.
    pub index: usize,
    pub units: Vec<T>,
    pub estimated_tokens: usize,
}

/// Greedy token-budget chunker.
#[derive(Debug, Clone, Copy)]
pub struct TokenChunker {
    pub max_tokens_per_chunk: usize,
    pub chars_per_token: usize,
}

impl Default for TokenChunker {
    fn default() -> Self {
        Self {
            max_tokens_per_chunk: 6000,
            chars_per_token: 4,
        }
    }
}

impl From<&crate::config::ChunkingSettings> for TokenChunker {
    fn from(settings: &crate::config::ChunkingSettings) -> Self {
        Self {
            max_tokens_per_chunk: settings.max_tokens_per_chunk,
            chars_per_token: settings.chars_per_token,
        }
    }
}

impl TokenChunker {
    pub fn new(max_tokens_per_chunk: usize, chars_per_token: usize) -> Self {
        Self {
            max_tokens_per_chunk,
            chars_per_token,
        }
    }

    /// Estimated token cost of a single unit.
    pub fn unit_tokens<T: ChunkUnit>(&self, unit: &T) -> usize {
        estimate_tokens(unit.char_len(), self.chars_per_token)
    }

    /// Split `units` into chunks, preserving order.
    pub fn chunk<T: ChunkUnit>(&self, units: Vec<T>) -> Vec<Chunk<T>> {
        let mut chunks: Vec<Chunk<T>> = Vec::new();
        let mut current: Vec<T> = Vec::new();
        let mut current_tokens = 0usize;

        for unit in units {
            let tokens = self.unit_tokens(&unit);

            if !current.is_empty() && current_tokens + tokens > self.max_tokens_per_chunk {
                chunks.push(Chunk {
                    index: chunks.len(),
                    units: std::mem::take(&mut current),
                    estimated_tokens: current_tokens,
                });
                current_tokens = 0;
            }

            current_tokens += tokens;
            current.push(unit);
        }

        if !current.is_empty() {
            chunks.push(Chunk {
                index: chunks.len(),
                units: current,
                estimated_tokens: current_tokens,
            });
        }

        debug!(
            "Chunked input into {} chunk(s) (budget {} tokens)",
            chunks.len(),
            self.max_tokens_per_chunk
        );

        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units(lengths: &[usize]) -> Vec<String> {
        lengths
            .iter()
            .enumerate()
            .map(|(i, len)| {
                let mut s = format!("{}", i % 10);
                s.push_str(&"x".repeat(len.saturating_sub(1)));
                s
            })
            .collect()
    }

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(0, 4), 0);
        assert_eq!(estimate_tokens(1, 4), 1);
        assert_eq!(estimate_tokens(8, 4), 2);
        assert_eq!(estimate_tokens(9, 4), 3);
        assert_eq!(estimate_tokens(9, 0), 9);
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        let chunker = TokenChunker::new(10, 4);
        assert!(chunker.chunk(Vec::<String>::new()).is_empty());
    }

    #[test]
    fn test_greedy_packing() {
        let chunker = TokenChunker::new(10, 4);
        // 16 chars = 4 tokens each; three fit in 12 > 10, so two per chunk.
        let chunks = chunker.chunk(units(&[16, 16, 16, 16, 16]));
        let sizes: Vec<_> = chunks.iter().map(|c| c.units.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(chunks[0].estimated_tokens, 8);
        assert_eq!(chunks[2].index, 2);
    }

    #[test]
    fn test_oversized_unit_sits_alone() {
        let chunker = TokenChunker::new(10, 4);
        let chunks = chunker.chunk(units(&[8, 400, 8]));
        let sizes: Vec<_> = chunks.iter().map(|c| c.units.len()).collect();
        assert_eq!(sizes, vec![1, 1, 1]);
        assert_eq!(chunks[1].estimated_tokens, 100);
    }

    #[test]
    fn test_concatenation_reproduces_input() {
        let lengths = [3, 41, 7, 7, 90, 1, 12, 33, 5, 5, 5, 64, 2];
        for budget in [1, 5, 10, 25, 1000] {
            let input = units(&lengths);
            let chunker = TokenChunker::new(budget, 4);
            let chunks = chunker.chunk(input.clone());

            let rebuilt: Vec<String> = chunks.iter().flat_map(|c| c.units.clone()).collect();
            assert_eq!(rebuilt, input);

            for chunk in &chunks {
                assert!(chunk.units.len() == 1 || chunk.estimated_tokens <= budget);
            }
        }
    }
}
