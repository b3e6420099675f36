use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How drained bytes are cut into records.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// One record per successful read, whatever it contains.
    #[default]
    Chunk,
    /// One record per `\n`-terminated line, newline stripped.
    Lines,
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Framing::Chunk => "chunk",
            Framing::Lines => "lines",
        })
    }
}

impl FromStr for Framing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chunk" => Ok(Framing::Chunk),
            "lines" | "line" => Ok(Framing::Lines),
            other => Err(format!("unknown framing '{}' (expected chunk or lines)", other)),
        }
    }
}

/// Reassembles lines across reads.
///
/// A line longer than `max_len` bytes is emitted in `max_len` pieces, cut on
/// a UTF-8 boundary where possible.
#[derive(Debug)]
pub struct LineFramer {
    pending: Vec<u8>,
    max_len: usize,
}

impl LineFramer {
    pub fn new(max_len: usize) -> Self {
        let max_len = max_len.max(1);
        Self {
            pending: Vec::with_capacity(max_len),
            max_len,
        }
    }

    pub fn push(&mut self, mut bytes: &[u8], mut emit: impl FnMut(&[u8])) {
        while !bytes.is_empty() {
            match bytes.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    self.extend(&bytes[..pos], &mut emit);
                    emit(&self.pending);
                    self.pending.clear();
                    bytes = &bytes[pos + 1..];
                }
                None => {
                    self.extend(bytes, &mut emit);
                    bytes = &[];
                }
            }
        }
    }

    /// Emit whatever partial line is left, e.g. at end of stream.
    pub fn finish(&mut self, mut emit: impl FnMut(&[u8])) {
        if !self.pending.is_empty() {
            emit(&self.pending);
            self.pending.clear();
        }
    }

    fn extend(&mut self, mut bytes: &[u8], emit: &mut impl FnMut(&[u8])) {
        while self.pending.len() + bytes.len() > self.max_len {
            let room = self.max_len - self.pending.len();
            self.pending.extend_from_slice(&bytes[..room]);
            bytes = &bytes[room..];

            let cut = utf8_boundary(&self.pending);
            emit(&self.pending[..cut]);
            self.pending.drain(..cut);
        }
        self.pending.extend_from_slice(bytes);
    }
}

/// Largest prefix length that does not end inside a multi-byte sequence.
/// Falls back to the full length when no boundary is found.
fn utf8_boundary(buf: &[u8]) -> usize {
    let len = buf.len();
    // A UTF-8 sequence is at most 4 bytes, so only the tail can be incomplete.
    for back in 1..=len.min(4) {
        let b = buf[len - back];
        if b & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let width = match b {
            0x00..=0x7F => 1,
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => return len,
        };
        return if width > back && len - back > 0 { len - back } else { len };
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(framer: &mut LineFramer, input: &[&[u8]]) -> Vec<String> {
        let mut out = Vec::new();
        for chunk in input {
            framer.push(chunk, |line| out.push(String::from_utf8_lossy(line).into_owned()));
        }
        out
    }

    #[test]
    fn splits_on_newlines() {
        let mut framer = LineFramer::new(100);
        let out = collect(&mut framer, &[b"one\ntwo\nthree\n"]);
        assert_eq!(out, vec!["one", "two", "three"]);
        assert!(framer.pending.is_empty());
    }

    #[test]
    fn carries_partial_lines_across_reads() {
        let mut framer = LineFramer::new(100);
        let out = collect(&mut framer, &[b"hel", b"lo\nwor", b"ld\n"]);
        assert_eq!(out, vec!["hello", "world"]);
    }

    #[test]
    fn keeps_empty_lines() {
        let mut framer = LineFramer::new(100);
        let out = collect(&mut framer, &[b"a\n\nb\n"]);
        assert_eq!(out, vec!["a", "", "b"]);
    }

    #[test]
    fn finish_flushes_remainder() {
        let mut framer = LineFramer::new(100);
        let mut out = collect(&mut framer, &[b"done\npartial"]);
        framer.finish(|line| out.push(String::from_utf8_lossy(line).into_owned()));
        assert_eq!(out, vec!["done", "partial"]);

        let mut extra = Vec::new();
        framer.finish(|line| extra.push(line.to_vec()));
        assert!(extra.is_empty());
    }

    #[test]
    fn long_lines_are_split_at_max_len() {
        let mut framer = LineFramer::new(4);
        let out = collect(&mut framer, &[b"abcdefghij\n"]);
        assert_eq!(out, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn long_line_split_across_reads() {
        let mut framer = LineFramer::new(4);
        let out = collect(&mut framer, &[b"abc", b"def", b"g\n"]);
        assert_eq!(out, vec!["abcd", "efg"]);
    }

    #[test]
    fn split_does_not_break_multibyte_chars() {
        // "aé" is 3 bytes; a 2-byte cut would land inside the é.
        let mut framer = LineFramer::new(2);
        let out = collect(&mut framer, &["aéb\n".as_bytes()]);
        assert_eq!(out, vec!["a", "é", "b"]);
    }

    #[test]
    fn utf8_boundary_cases() {
        assert_eq!(utf8_boundary(b"abc"), 3);
        assert_eq!(utf8_boundary("aé".as_bytes()), 3);
        assert_eq!(utf8_boundary(&"aé".as_bytes()[..2]), 1);
        // Only a lead byte: nothing to back off to.
        assert_eq!(utf8_boundary(&[0xE2]), 1);
    }

    #[test]
    fn parse_framing() {
        assert_eq!("chunk".parse::<Framing>().unwrap(), Framing::Chunk);
        assert_eq!("Lines".parse::<Framing>().unwrap(), Framing::Lines);
        assert!("words".parse::<Framing>().is_err());
        assert_eq!(Framing::default(), Framing::Chunk);
    }
}
