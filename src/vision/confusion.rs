//! Visually confusable characters
//!
//! Hand-authored pairs of glyphs that children (and the classifier) mix up.
//! The relation is intentionally not symmetric: each row lists what a
//! recognized character is most often mistaken for, in order.

use std::collections::HashMap;
use std::sync::OnceLock;

const BUILTIN_ENTRIES: &[(char, &[char])] = &[
    // hiragana
    ('あ', &['お', 'む', 'ぬ']),
    ('い', &['り', 'こ']),
    ('う', &['ら', 'つ']),
    ('え', &['ん', 'そ']),
    ('お', &['あ', 'む']),
    ('き', &['さ', 'ち']),
    ('く', &['へ', 'し']),
    ('け', &['は', 'に']),
    ('こ', &['い', 'に']),
    ('さ', &['き', 'ち']),
    ('し', &['つ', 'く']),
    ('そ', &['え', 'ろ']),
    ('た', &['な', 'に']),
    ('ち', &['さ', 'ら']),
    ('つ', &['う', 'し']),
    ('て', &['で', 'と']),
    ('と', &['て', 'ど']),
    ('な', &['た', 'ま']),
    ('に', &['こ', 'け', 'た']),
    ('ぬ', &['め', 'あ', 'ね']),
    ('ね', &['れ', 'わ', 'ぬ']),
    ('は', &['ほ', 'け', 'ば']),
    ('ほ', &['は', 'ま']),
    ('ま', &['ほ', 'よ']),
    ('み', &['よ', 'め']),
    ('む', &['お', 'す']),
    ('め', &['ぬ', 'の']),
    ('よ', &['ま', 'み']),
    ('ら', &['う', 'ち']),
    ('り', &['い', 'ソ']),
    ('る', &['ろ', 'ゐ']),
    ('れ', &['ね', 'わ']),
    ('ろ', &['る', 'そ']),
    ('わ', &['れ', 'ね']),
    ('ん', &['え', 'そ']),
    // katakana
    ('ア', &['マ', 'ヤ']),
    ('ウ', &['ワ', 'ク']),
    ('エ', &['工', 'ユ']),
    ('カ', &['力', 'ヵ']),
    ('ク', &['ケ', 'タ', 'ワ']),
    ('コ', &['ユ', 'ロ']),
    ('シ', &['ツ', 'ン']),
    ('ス', &['ヌ', 'ヲ']),
    ('ソ', &['ン', 'リ']),
    ('タ', &['ク', '夕']),
    ('チ', &['テ', '千']),
    ('ツ', &['シ', 'ソ']),
    ('テ', &['チ', 'ラ']),
    ('ナ', &['メ', '十']),
    ('ヌ', &['ス', 'メ']),
    ('ハ', &['八', 'ル']),
    ('ヘ', &['へ']),
    ('マ', &['ア', 'ム']),
    ('メ', &['ヌ', 'ナ']),
    ('ユ', &['コ', 'エ']),
    ('ラ', &['テ', 'フ']),
    ('ロ', &['口', 'コ']),
    ('ワ', &['ウ', 'ク']),
    ('ン', &['ソ', 'シ']),
    // digits
    ('0', &['6', '9']),
    ('1', &['7', '4']),
    ('2', &['7', '3']),
    ('3', &['8', '2']),
    ('4', &['9', '1']),
    ('5', &['6', '3']),
    ('6', &['0', '5', '8']),
    ('7', &['1', '2']),
    ('8', &['3', '0', '6']),
    ('9', &['4', '0']),
];

/// Static character confusion table
#[derive(Debug, Clone)]
pub struct ConfusionTable {
    entries: HashMap<char, Vec<char>>,
}

impl ConfusionTable {
    /// Build a table from authored rows.
    ///
    /// # Panics
    ///
    /// Panics if a character appears as a key more than once.
    pub fn from_entries(rows: &[(char, &[char])]) -> Self {
        let mut entries = HashMap::with_capacity(rows.len());
        for (key, confusables) in rows {
            let previous = entries.insert(*key, confusables.to_vec());
            assert!(previous.is_none(), "duplicate confusion table entry for '{}'", key);
        }
        Self { entries }
    }

    /// The process-wide built-in table
    pub fn builtin() -> &'static ConfusionTable {
        static TABLE: OnceLock<ConfusionTable> = OnceLock::new();
        TABLE.get_or_init(|| ConfusionTable::from_entries(BUILTIN_ENTRIES))
    }

    /// Characters commonly mistaken for `c`, in authored order
    pub fn confusables(&self, c: char) -> &[char] {
        self.entries.get(&c).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup() {
        let table = ConfusionTable::builtin();
        assert_eq!(table.confusables('あ'), &['お', 'む', 'ぬ']);
        assert_eq!(table.confusables('お'), &['あ', 'む']);
        assert!(table.confusables('Z').is_empty());
        assert!(!table.is_empty());
    }

    #[test]
    fn test_table_is_kept_asymmetric() {
        let table = ConfusionTable::builtin();
        assert!(table.confusables('あ').contains(&'ぬ'));
        assert!(table.confusables('む').iter().all(|&c| c != 'あ'));
    }

    #[test]
    fn test_builtin_is_shared() {
        assert!(std::ptr::eq(ConfusionTable::builtin(), ConfusionTable::builtin()));
    }

    #[test]
    #[should_panic(expected = "duplicate confusion table entry")]
    fn test_duplicate_keys_panic() {
        let rows: &[(char, &[char])] = &[('あ', &['お']), ('あ', &['む'])];
        ConfusionTable::from_entries(rows);
    }
}
