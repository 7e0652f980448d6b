use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::RwLock;

/// Errors that can occur while loading vocabulary files.
#[derive(Debug, thiserror::Error)]
pub enum VocabError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

type Result<T> = std::result::Result<T, VocabError>;

/// Surface form of the nonterminal marker, reserved on both language sides.
pub const NT_MARKER: &str = "[X][X]";

/// Surface returned for ids that have no known word.
pub const UNK_WORD: &str = "<unk>";

#[derive(Debug, Default)]
struct VocabInner {
    word2id: HashMap<String, i32>,
    id2word: Vec<String>,
}

/// A bidirectional word <-> id map with dense `i32` ids.
///
/// `get_id` interns unseen words so that every token of an input sentence has
/// a valid id; rendering an out-of-vocabulary source token back to its
/// surface relies on this. Interning only happens while models are loaded and
/// decoders are constructed. Decoding proper never adds words, so concurrent
/// span workers only take the read lock.
#[derive(Debug)]
pub struct Vocab {
    inner: RwLock<VocabInner>,
}

impl Vocab {
    /// Create a vocabulary containing only the reserved entries:
    /// `<unk>` at id 0 and the nonterminal marker `[X][X]`.
    pub fn new() -> Self {
        let vocab = Vocab {
            inner: RwLock::new(VocabInner::default()),
        };
        vocab.get_id(UNK_WORD);
        vocab.get_id(NT_MARKER);
        vocab
    }

    /// Load a vocabulary from a word-per-line file.
    ///
    /// Reserved entries are interned first, then each non-empty line in file
    /// order. Duplicate lines keep their first id.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let vocab = Self::new();
        let file = File::open(path.as_ref())?;
        let reader = BufReader::new(file);
        for line in reader.lines() {
            let line = line?;
            let word = line.trim();
            if word.is_empty() {
                continue;
            }
            vocab.get_id(word);
        }
        Ok(vocab)
    }

    /// Build a vocabulary from an iterator of words (reserved entries first).
    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let vocab = Self::new();
        for word in words {
            vocab.get_id(word.as_ref());
        }
        vocab
    }

    /// Return the id for `word`, interning it if unseen.
    pub fn get_id(&self, word: &str) -> i32 {
        if let Some(&id) = self.inner.read().expect("vocab lock poisoned").word2id.get(word) {
            return id;
        }
        let mut inner = self.inner.write().expect("vocab lock poisoned");
        // Racing writers may have interned the word in between.
        if let Some(&id) = inner.word2id.get(word) {
            return id;
        }
        let id = inner.id2word.len() as i32;
        inner.id2word.push(word.to_string());
        inner.word2id.insert(word.to_string(), id);
        id
    }

    /// Return the surface for `id`, or `<unk>` for unknown ids.
    pub fn get_word(&self, id: i32) -> String {
        let inner = self.inner.read().expect("vocab lock poisoned");
        match usize::try_from(id).ok().and_then(|i| inner.id2word.get(i)) {
            Some(word) => word.clone(),
            None => UNK_WORD.to_string(),
        }
    }

    /// Number of interned words, including the reserved entries.
    pub fn size(&self) -> usize {
        self.inner.read().expect("vocab lock poisoned").id2word.len()
    }

    /// Id of the nonterminal marker.
    pub fn nt_id(&self) -> i32 {
        self.get_id(NT_MARKER)
    }
}

impl Default for Vocab {
    fn default() -> Self {
        Self::new()
    }
}

/// The set of source-side function words, by source vocabulary id.
#[derive(Debug, Default)]
pub struct FunctionWordSet {
    ids: HashSet<i32>,
}

impl FunctionWordSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a function-word list (one word per line) through `src_vocab`.
    pub fn load(path: impl AsRef<Path>, src_vocab: &Vocab) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let reader = BufReader::new(file);
        let mut ids = HashSet::new();
        for line in reader.lines() {
            let line = line?;
            let word = line.trim();
            if word.is_empty() {
                continue;
            }
            ids.insert(src_vocab.get_id(word));
        }
        Ok(Self { ids })
    }

    /// Build a set from explicit ids.
    pub fn from_ids(ids: impl IntoIterator<Item = i32>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    /// Whether `id` is a function word.
    pub fn contains(&self, id: i32) -> bool {
        self.ids.contains(&id)
    }

    /// Number of function words in the set.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_reserved_entries() {
        let vocab = Vocab::new();
        assert_eq!(vocab.get_id(UNK_WORD), 0);
        assert_eq!(vocab.nt_id(), 1);
        assert_eq!(vocab.size(), 2);
    }

    #[test]
    fn test_intern_round_trip() {
        let vocab = Vocab::new();
        let id = vocab.get_id("house");
        assert_eq!(vocab.get_id("house"), id);
        assert_eq!(vocab.get_word(id), "house");
    }

    #[test]
    fn test_unknown_id_renders_unk() {
        let vocab = Vocab::new();
        assert_eq!(vocab.get_word(1234), UNK_WORD);
        assert_eq!(vocab.get_word(-5), UNK_WORD);
    }

    #[test]
    fn test_load_from_file() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"the\nhouse\n\ngreen\nhouse\n").unwrap();
        f.flush().unwrap();

        let vocab = Vocab::load(f.path()).unwrap();
        // Reserved entries come first, duplicates keep their first id.
        let the = vocab.get_id("the");
        let house = vocab.get_id("house");
        assert_eq!(the, 2);
        assert_eq!(house, 3);
        assert_eq!(vocab.get_id("green"), 4);
        assert_eq!(vocab.size(), 5);
        assert_eq!(vocab.get_word(house), "house");
    }

    #[test]
    fn test_function_word_set() {
        let vocab = Vocab::from_words(["the", "of", "house"]);

        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"the\nof\n").unwrap();
        f.flush().unwrap();

        let fwords = FunctionWordSet::load(f.path(), &vocab).unwrap();
        assert_eq!(fwords.len(), 2);
        assert!(fwords.contains(vocab.get_id("the")));
        assert!(fwords.contains(vocab.get_id("of")));
        assert!(!fwords.contains(vocab.get_id("house")));
    }

    #[test]
    fn test_function_word_set_empty() {
        let fwords = FunctionWordSet::new();
        assert!(fwords.is_empty());
        assert!(!fwords.contains(0));
    }
}
