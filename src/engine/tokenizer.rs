//! Deterministic vocabulary tokenizer for the local engine.
//!
//! Greedy longest-match over a fixed piece list. Encoding then decoding
//! reproduces the original text for any string composed only of known
//! pieces; characters outside the vocabulary map to the UNK id, which
//! decodes to U+FFFD.

use anyhow::{bail, Result};
use std::collections::HashMap;

pub const UNK_PIECE: &str = "<unk>";
pub const END_PIECE: &str = "<end>";

pub struct Tokenizer {
    pieces: Vec<String>,
    index: HashMap<String, u32>,
    /// Longest piece length in chars; bounds the match window.
    max_piece_chars: usize,
    unk_id: u32,
    end_id: u32,
}

impl Tokenizer {
    /// Build from a vocabulary list. The list must contain the UNK and END
    /// markers and no duplicates; piece ids are list positions.
    pub fn new(pieces: Vec<String>) -> Result<Self> {
        if pieces.is_empty() {
            bail!("tokenizer vocabulary is empty");
        }
        let mut index = HashMap::with_capacity(pieces.len());
        for (id, piece) in pieces.iter().enumerate() {
            if index.insert(piece.clone(), id as u32).is_some() {
                bail!("duplicate vocabulary piece: {piece:?}");
            }
        }
        let unk_id = match index.get(UNK_PIECE) {
            Some(id) => *id,
            None => bail!("vocabulary is missing the {UNK_PIECE} piece"),
        };
        let end_id = match index.get(END_PIECE) {
            Some(id) => *id,
            None => bail!("vocabulary is missing the {END_PIECE} piece"),
        };
        let max_piece_chars = pieces.iter().map(|p| p.chars().count()).max().unwrap_or(1);
        Ok(Self {
            pieces,
            index,
            max_piece_chars,
            unk_id,
            end_id,
        })
    }

    pub fn vocab_size(&self) -> usize {
        self.pieces.len()
    }

    pub fn unk_id(&self) -> u32 {
        self.unk_id
    }

    pub fn end_id(&self) -> u32 {
        self.end_id
    }

    /// Greedy longest-match encoding. Deterministic: the same text always
    /// yields the same id sequence.
    pub fn encode(&self, text: &str) -> Vec<u32> {
        let chars: Vec<char> = text.chars().collect();
        let mut ids = Vec::new();
        let mut pos = 0;

        while pos < chars.len() {
            let window = self.max_piece_chars.min(chars.len() - pos);
            let mut matched = None;
            for len in (1..=window).rev() {
                let candidate: String = chars[pos..pos + len].iter().collect();
                if let Some(&id) = self.index.get(&candidate) {
                    matched = Some((id, len));
                    break;
                }
            }
            match matched {
                Some((id, len)) => {
                    ids.push(id);
                    pos += len;
                }
                None => {
                    ids.push(self.unk_id);
                    pos += 1;
                }
            }
        }
        ids
    }

    /// Decode ids back to text. UNK and out-of-range ids render as U+FFFD.
    pub fn decode(&self, ids: &[u32]) -> String {
        let mut out = String::new();
        for &id in ids {
            if id == self.unk_id {
                out.push('\u{FFFD}');
            } else if let Some(piece) = self.pieces.get(id as usize) {
                out.push_str(piece);
            } else {
                out.push('\u{FFFD}');
            }
        }
        out
    }
}
