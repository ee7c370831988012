//! 方式をまたぐ結合テスト
//!
//! 両方式の挿入・検索・接頭辞列挙と、アーカイブを介した往復、
//! テキストソースからの一括構築を検証します。

use std::fs;
use std::io::Write;

use tempfile::tempdir;

use crate::errors::XtrieError;
use crate::{Trie, TrieKind, Value};

const WORDS: &[(&[u8], Value)] = &[
    (b"baby", 1),
    (b"bachelor", 2),
    (b"back", 3),
    (b"badge", 4),
    (b"badger", 5),
    (b"badness", 6),
    (b"bcs", 7),
];

fn build_trie(kind: TrieKind, records: &[(&[u8], Value)]) -> Trie {
    let mut trie = Trie::new(kind, 0);
    for &(word, value) in records {
        trie.insert(word, value);
    }
    trie
}

fn assert_words(trie: &Trie) {
    for &(word, value) in WORDS {
        assert_eq!(trie.search(word), Some(value), "missing {:?}", word);
    }
    assert_eq!(trie.search(b"ba"), None);
    assert_eq!(trie.search(b"badgerr"), None);
    assert_eq!(trie.search(b"b"), None);
    assert_eq!(trie.search(b"bbbb"), None);

    let mut matches = trie.prefix_search(b"bad");
    matches.sort();
    assert_eq!(
        matches,
        vec![
            (b"badge".to_vec(), 4),
            (b"badger".to_vec(), 5),
            (b"badness".to_vec(), 6),
        ]
    );
    assert_eq!(trie.prefix_search(b"").len(), WORDS.len());
}

#[test]
fn test_word_set_tail() {
    assert_words(&build_trie(TrieKind::Tail, WORDS));
}

#[test]
fn test_word_set_two() {
    assert_words(&build_trie(TrieKind::Two, WORDS));
}

#[test]
fn test_insertion_order_is_irrelevant() {
    for kind in [TrieKind::Tail, TrieKind::Two] {
        let mut forward: Vec<(&[u8], Value)> = WORDS.to_vec();
        forward.sort();
        let mut reverse = forward.clone();
        reverse.reverse();
        assert_words(&build_trie(kind, &forward));
        assert_words(&build_trie(kind, &reverse));
    }
}

#[test]
fn test_overwrite_keeps_last_value() {
    for kind in [TrieKind::Tail, TrieKind::Two] {
        let mut trie = build_trie(kind, WORDS);
        trie.insert(b"badge", 100);
        trie.insert(b"badge", 200);
        assert_eq!(trie.search(b"badge"), Some(200));
        assert_eq!(trie.search(b"badger"), Some(5));
    }
}

#[test]
fn test_empty_and_binary_keys() {
    for kind in [TrieKind::Tail, TrieKind::Two] {
        let mut trie = Trie::new(kind, 0);
        trie.insert(b"", 9);
        trie.insert(b"\x00", -1);
        trie.insert(b"\x00\x01", 0);
        trie.insert(b"\xff\xff", 12);
        assert_eq!(trie.search(b""), Some(9));
        assert_eq!(trie.search(b"\x00"), Some(-1));
        assert_eq!(trie.search(b"\x00\x01"), Some(0));
        assert_eq!(trie.search(b"\xff\xff"), Some(12));
        assert_eq!(trie.search(b"\xff"), None);
    }
}

#[test]
fn test_archive_roundtrip() {
    let dir = tempdir().unwrap();
    for (kind, name) in [(TrieKind::Tail, "words.tail"), (TrieKind::Two, "words.two")] {
        let path = dir.path().join(name);
        let trie = build_trie(kind, WORDS);
        trie.build(&path, false).unwrap();

        let loaded = Trie::from_archive(&path).unwrap();
        assert_eq!(loaded.kind(), kind);
        assert_words(&loaded);

        // the loaded trie answers exactly like the in-memory one
        for prefix in [&b""[..], &b"b"[..], &b"ba"[..], &b"bad"[..], &b"badge"[..], &b"x"[..]] {
            let mut expected = trie.prefix_search(prefix);
            let mut actual = loaded.prefix_search(prefix);
            expected.sort();
            actual.sort();
            assert_eq!(expected, actual, "prefix {:?}", prefix);
        }
    }
}

#[test]
fn test_archive_roundtrip_nested_keys() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested.two");
    let mut trie = Trie::new(TrieKind::Two, 0);
    trie.insert(b"a", 1);
    trie.insert(b"ab", 2);
    trie.insert(b"abc", 3);
    trie.build(&path, false).unwrap();

    let loaded = Trie::from_archive(&path).unwrap();
    assert_eq!(loaded.search(b"a"), Some(1));
    assert_eq!(loaded.search(b"ab"), Some(2));
    assert_eq!(loaded.search(b"abc"), Some(3));
    assert_eq!(loaded.search(b"abcd"), None);
}

#[test]
#[should_panic(expected = "archive-backed")]
fn test_loaded_trie_rejects_insert() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("frozen.two");
    build_trie(TrieKind::Two, WORDS).build(&path, false).unwrap();
    let mut loaded = Trie::from_archive(&path).unwrap();
    loaded.insert(b"more", 1);
}

#[test]
fn test_archive_magic_mismatch() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("garbage");
    fs::write(&path, b"this is not a trie archive, not at all").unwrap();
    match Trie::from_archive(&path) {
        Err(XtrieError::BadTrieArchive(_)) => {}
        other => panic!("unexpected result: {:?}", other.map(|t| t.kind())),
    }
}

#[test]
fn test_archive_truncated() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("short.two");
    build_trie(TrieKind::Two, WORDS).build(&path, false).unwrap();
    let bytes = fs::read(&path).unwrap();
    fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
    match Trie::from_archive(&path) {
        Err(XtrieError::BadTrieArchive(_)) => {}
        other => panic!("unexpected result: {:?}", other.map(|t| t.kind())),
    }
}

#[test]
fn test_read_from_text() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("words.txt");
    let mut file = fs::File::create(&source).unwrap();
    for &(word, value) in WORDS {
        writeln!(file, "{} {}", value, String::from_utf8_lossy(word)).unwrap();
    }
    drop(file);

    for kind in [TrieKind::Tail, TrieKind::Two] {
        let mut trie = Trie::new(kind, 0);
        trie.read_from_text(&source, false).unwrap();
        assert_words(&trie);
    }
}

#[test]
fn test_read_from_text_reports_bad_line() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("broken.txt");
    fs::write(&source, "1 one\n2 two\nbroken\n4 four\n").unwrap();

    let mut trie = Trie::new(TrieKind::Two, 0);
    match trie.read_from_text(&source, false) {
        Err(XtrieError::BadTrieSource(e)) => assert_eq!(e.line(), Some(3)),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn test_read_from_text_missing_file() {
    let mut trie = Trie::new(TrieKind::Two, 0);
    match trie.read_from_text("/no/such/source.txt", false) {
        Err(XtrieError::BadTrieSource(e)) => assert_eq!(e.line(), None),
        other => panic!("unexpected result: {:?}", other),
    }
}

fn xorshift(state: &mut u64) -> u64 {
    *state ^= *state << 13;
    *state ^= *state >> 7;
    *state ^= *state << 17;
    *state
}

#[test]
fn test_random_records_match_reference() {
    use std::collections::BTreeMap;

    let mut seed = 0x9e37_79b9_7f4a_7c15u64;
    let mut reference = BTreeMap::new();
    let mut records = Vec::new();
    for i in 0..2000 {
        let len = (xorshift(&mut seed) % 12) as usize;
        let key: Vec<u8> = (0..len).map(|_| xorshift(&mut seed) as u8).collect();
        let value = i as Value - 1000;
        reference.insert(key.clone(), value);
        records.push((key, value));
    }

    for kind in [TrieKind::Tail, TrieKind::Two] {
        let mut trie = Trie::new(kind, 0);
        for (key, value) in &records {
            trie.insert(key, *value);
        }

        // every record answers with its last written value
        for (key, value) in &reference {
            assert_eq!(trie.search(key), Some(*value));
        }

        // keys longer than anything inserted always miss
        for _ in 0..500 {
            let key: Vec<u8> = (0..13).map(|_| xorshift(&mut seed) as u8).collect();
            assert_eq!(trie.search(&key), None);
        }

        // a full dump is exactly the reference map
        let mut dump = trie.prefix_search(b"");
        dump.sort();
        let expected: Vec<(Vec<u8>, Value)> =
            reference.iter().map(|(k, v)| (k.clone(), *v)).collect();
        assert_eq!(dump, expected);

        // prefix enumeration agrees with a filtered reference
        for (sample, _) in reference.iter().step_by(257) {
            let prefix = &sample[..sample.len().min(2)];
            let mut got = trie.prefix_search(prefix);
            got.sort();
            let filtered: Vec<(Vec<u8>, Value)> = reference
                .iter()
                .filter(|(k, _)| k.starts_with(prefix))
                .map(|(k, v)| (k.clone(), *v))
                .collect();
            assert_eq!(got, filtered, "prefix {:?}", prefix);
        }
    }
}

#[test]
fn test_keys_with_spaces_from_text() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("spaced.txt");
    fs::write(&source, "10 new york\n20 new\n").unwrap();

    let mut trie = Trie::new(TrieKind::Two, 0);
    trie.read_from_text(&source, false).unwrap();
    assert_eq!(trie.search(b"new york"), Some(10));
    assert_eq!(trie.search(b"new"), Some(20));
    assert_eq!(trie.search(b"new "), None);
}
