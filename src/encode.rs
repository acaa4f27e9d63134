//! Turning one joined sample into one fixed-length row of token ids.

use anyhow::{Context, Result};

use crate::{
    dataset::SampleTable,
    tokenizer::{ControlToken, TextTokenizer, Vocabulary},
};

/// Why a sample produced no row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingTranscript,
    MissingAudio,
}

/// Outcome of encoding a single sample id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assembled {
    Sample(EncodedSample),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedSample {
    pub ids: Vec<i32>,
    /// The unpadded sequence was longer than the row and lost its tail.
    pub truncated: bool,
}

/// Shifts raw audio codes past the text vocabulary. Fails if a shifted id does not fit in `i32`.
pub fn remap_codes(codes: &[u32], base_num: u32) -> Result<Vec<i32>> {
    codes
        .iter()
        .map(|&code| {
            code.checked_add(base_num)
                .and_then(|id| i32::try_from(id).ok())
                .with_context(|| format!("audio code {} does not fit above base {}", code, base_num))
        })
        .collect()
}

/// Cuts `ids` down to `len`, keeping the prefix, or right-pads it with `pad_id`.
/// Returns whether anything was cut.
pub fn fix_length(ids: &mut Vec<i32>, len: usize, pad_id: i32) -> bool {
    if ids.len() > len {
        ids.truncate(len);
        true
    } else {
        ids.resize(len, pad_id);
        false
    }
}

/// Read-only context shared by every worker: the joined mappings, the tokenizer, and the
/// ids resolved once for the run.
pub struct SampleEncoder<'a, T: TextTokenizer + ?Sized> {
    table: &'a SampleTable,
    tokenizer: &'a T,
    vocab: Vocabulary,
    max_seq_len: usize,
}

impl<'a, T: TextTokenizer + ?Sized> SampleEncoder<'a, T> {
    pub fn new(table: &'a SampleTable, tokenizer: &'a T, vocab: Vocabulary, max_seq_len: usize) -> Self {
        Self { table, tokenizer, vocab, max_seq_len }
    }

    pub fn max_seq_len(&self) -> usize {
        self.max_seq_len
    }

    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn encode(&self, id: &str) -> Result<Assembled> {
        let Some(transcript) = self.table.transcript(id) else {
            return Ok(Assembled::Skipped(SkipReason::MissingTranscript));
        };
        let Some(codes) = self.table.audio_codes(id) else {
            return Ok(Assembled::Skipped(SkipReason::MissingAudio));
        };

        // The markers stand in for the tokenizer's own special tokens.
        let text = format!(
            "{}{}{}",
            ControlToken::TextUnderstandingStart.as_str(),
            transcript,
            ControlToken::TextUnderstandingEnd.as_str()
        );
        let text_ids = self.tokenizer.encode(&text)?;

        let mut ids = Vec::with_capacity(text_ids.len() + codes.len() + 2);
        ids.extend(text_ids.iter().map(|&t| t as i32));
        ids.push(self.vocab.id(ControlToken::SpeechGenerationStart) as i32);
        ids.extend(remap_codes(codes, self.vocab.base_num)?);
        ids.push(self.vocab.id(ControlToken::SpeechGenerationEnd) as i32);

        // Truncation can drop the speech end marker; rows are kept as-is.
        let truncated = fix_length(&mut ids, self.max_seq_len, self.vocab.pad_id as i32);
        if truncated {
            tracing::debug!(id, "sequence truncated to {} tokens", self.max_seq_len);
        }
        Ok(Assembled::Sample(EncodedSample { ids, truncated }))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::dataset::SampleRow;

    /// Splits on whitespace after carving out `<|...|>` markers. Words get ids from a fixed
    /// table, unknown words map to 0.
    pub(crate) struct WordTokenizer {
        vocab: HashMap<String, u32>,
    }

    impl WordTokenizer {
        pub(crate) fn new() -> Self {
            let mut vocab: HashMap<String, u32> = ["<unk>", "<s>", "</s>", "hello", "world", "a", "b", "c"]
                .iter()
                .enumerate()
                .map(|(i, w)| (w.to_string(), i as u32))
                .collect();
            for token in ControlToken::ALL {
                let next = vocab.len() as u32;
                vocab.insert(token.as_str().to_string(), next);
            }
            Self { vocab }
        }
    }

    impl TextTokenizer for WordTokenizer {
        fn encode(&self, text: &str) -> Result<Vec<u32>> {
            let mut ids = Vec::new();
            let mut rest = text;
            while !rest.is_empty() {
                if rest.starts_with("<|") {
                    if let Some(end) = rest.find("|>") {
                        let marker = &rest[..end + 2];
                        ids.push(self.token_to_id(marker).unwrap_or(0));
                        rest = &rest[end + 2..];
                        continue;
                    }
                }
                let next = rest[1..].find("<|").map(|i| i + 1).unwrap_or(rest.len());
                for word in rest[..next].split_whitespace() {
                    ids.push(self.token_to_id(word).unwrap_or(0));
                }
                rest = &rest[next..];
            }
            Ok(ids)
        }

        fn token_to_id(&self, token: &str) -> Option<u32> {
            self.vocab.get(token).copied()
        }

        fn vocab_size(&self) -> usize {
            self.vocab.len()
        }
    }

    pub(crate) fn sample(id: &str, text: Option<&str>, codes: Option<Vec<u32>>) -> SampleRow {
        SampleRow { id: id.to_string(), text: text.map(str::to_string), codes }
    }

    fn encoder_with<'a>(table: &'a SampleTable, tok: &'a WordTokenizer, len: usize) -> SampleEncoder<'a, WordTokenizer> {
        let vocab = Vocabulary::resolve(tok, "</s>").unwrap();
        SampleEncoder::new(table, tok, vocab, len)
    }

    #[test]
    fn remap_adds_base_and_stays_above_text_range() {
        let remapped = remap_codes(&[0, 1, 1023], 16).unwrap();
        assert_eq!(remapped, vec![16, 17, 1039]);
        assert!(remapped.iter().all(|&id| id >= 16));
        assert!(remap_codes(&[], 16).unwrap().is_empty());
    }

    #[test]
    fn remap_rejects_ids_past_i32() {
        let base = 32008u32;
        let largest = i32::MAX as u32 - base;
        assert_eq!(remap_codes(&[largest], base).unwrap(), vec![i32::MAX]);
        assert!(remap_codes(&[largest + 1], base).is_err());
        assert!(remap_codes(&[(i32::MAX - 5) as u32], base).is_err());
        assert!(remap_codes(&[u32::MAX], base).is_err());
    }

    #[test]
    fn out_of_range_code_fails_the_sample() {
        let tok = WordTokenizer::new();
        let table: SampleTable = vec![sample("big", Some("hello"), Some(vec![i32::MAX as u32]))].into_iter().collect();
        let enc = encoder_with(&table, &tok, 8);
        assert!(enc.encode("big").is_err());
    }

    #[test]
    fn fix_length_pads_and_truncates() {
        let mut short = vec![1, 2, 3];
        assert!(!fix_length(&mut short, 6, 9));
        assert_eq!(short, vec![1, 2, 3, 9, 9, 9]);

        let mut long: Vec<i32> = (0..10).collect();
        assert!(fix_length(&mut long, 4, 9));
        assert_eq!(long, vec![0, 1, 2, 3]);

        let mut exact = vec![5, 6];
        assert!(!fix_length(&mut exact, 2, 9));
        assert_eq!(exact, vec![5, 6]);
    }

    #[test]
    fn assembles_text_then_codes_then_padding() {
        let tok = WordTokenizer::new();
        let table: SampleTable = vec![sample("s1", Some("hello world"), Some(vec![0, 5]))].into_iter().collect();
        let enc = encoder_with(&table, &tok, 12);
        let vocab = *enc.vocab();
        let base = vocab.base_num as i32;
        assert_eq!(base, 16);

        let Assembled::Sample(out) = enc.encode("s1").unwrap() else {
            panic!("expected a sample");
        };
        let expected = vec![
            vocab.id(ControlToken::TextUnderstandingStart) as i32,
            3,
            4,
            vocab.id(ControlToken::TextUnderstandingEnd) as i32,
            vocab.id(ControlToken::SpeechGenerationStart) as i32,
            base,
            base + 5,
            vocab.id(ControlToken::SpeechGenerationEnd) as i32,
            2,
            2,
            2,
            2,
        ];
        assert_eq!(out.ids, expected);
        assert!(!out.truncated);
    }

    #[test]
    fn long_samples_keep_their_prefix() {
        let tok = WordTokenizer::new();
        let codes: Vec<u32> = (0..50).collect();
        let table: SampleTable = vec![sample("long", Some("a b c"), Some(codes.clone()))].into_iter().collect();
        let enc = encoder_with(&table, &tok, 10);
        let vocab = *enc.vocab();

        let Assembled::Sample(out) = enc.encode("long").unwrap() else {
            panic!("expected a sample");
        };
        assert!(out.truncated);
        assert_eq!(out.ids.len(), 10);
        // 5 text ids, the start marker, then the first 4 codes. No end marker survives.
        assert_eq!(out.ids[5], vocab.id(ControlToken::SpeechGenerationStart) as i32);
        assert_eq!(&out.ids[6..], &remap_codes(&codes[..4], vocab.base_num).unwrap()[..]);
        assert!(!out.ids.contains(&(vocab.id(ControlToken::SpeechGenerationEnd) as i32)));
    }

    #[test]
    fn every_sample_has_the_configured_length() {
        let tok = WordTokenizer::new();
        let table: SampleTable = (0..20u32)
            .map(|n| sample(&format!("s{n}"), Some("hello"), Some((0..n * 3).collect())))
            .collect();
        let enc = encoder_with(&table, &tok, 32);
        for id in table.ids() {
            match enc.encode(id).unwrap() {
                Assembled::Sample(out) => assert_eq!(out.ids.len(), 32),
                Assembled::Skipped(r) => panic!("unexpected skip {r:?}"),
            }
        }
    }

    #[test]
    fn missing_joins_are_skipped() {
        let tok = WordTokenizer::new();
        let table: SampleTable = vec![
            sample("no_text", None, Some(vec![1])),
            sample("no_audio", Some("hello"), None),
        ]
        .into_iter()
        .collect();
        let enc = encoder_with(&table, &tok, 8);
        assert_eq!(enc.encode("no_text").unwrap(), Assembled::Skipped(SkipReason::MissingTranscript));
        assert_eq!(enc.encode("no_audio").unwrap(), Assembled::Skipped(SkipReason::MissingAudio));
        assert_eq!(enc.encode("unknown").unwrap(), Assembled::Skipped(SkipReason::MissingTranscript));
    }
}
