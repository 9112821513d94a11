//! Unit tests for encoding and decoding

use tinygpt_tokenizer::{SpecialTokens, Tokenizer};

fn create_test_tokenizer() -> Tokenizer {
    let corpus = vec!["hello world", "hello rust", "world peace", "the quick brown fox"];
    Tokenizer::train_from_iterator(corpus.iter(), 500).expect("Failed to create test tokenizer")
}

#[test]
fn test_encode_empty() {
    let tokenizer = create_test_tokenizer();
    assert!(tokenizer.encode("").unwrap().is_empty());
    assert_eq!(tokenizer.decode(&[]).unwrap(), "");
}

#[test]
fn test_frequent_words_merge() {
    let tokenizer = create_test_tokenizer();

    // "hello" appears twice in the corpus; it should need fewer tokens than bytes
    let ids = tokenizer.encode("hello").unwrap();
    assert!(ids.len() < "hello".len());
}

#[test]
fn test_unseen_text_still_encodes() {
    let tokenizer = create_test_tokenizer();
    let text = "zyx wvu ~ é 漢字";
    let ids = tokenizer.encode(text).unwrap();
    assert_eq!(tokenizer.decode(&ids).unwrap(), text);
}

#[test]
fn test_leading_and_repeated_whitespace_preserved() {
    let tokenizer = create_test_tokenizer();
    for text in ["  hello", "hello  world", "\tworld\n", " "] {
        let ids = tokenizer.encode(text).unwrap();
        assert_eq!(tokenizer.decode(&ids).unwrap(), text);
    }
}

#[test]
fn test_special_tokens_reserved() {
    let tokenizer = create_test_tokenizer();
    let special = SpecialTokens::default();

    for token in special.all() {
        let id = tokenizer.special_token_id(token).unwrap();
        assert_eq!(tokenizer.encode(token).unwrap(), vec![id]);
        // Special tokens survive decoding
        assert_eq!(tokenizer.decode(&[id]).unwrap(), token);
    }
}

#[test]
fn test_vocab_size_bounded_by_target() {
    let tokenizer = create_test_tokenizer();
    // 256 byte symbols + 5 special tokens at minimum
    assert!(tokenizer.vocab_size() >= 261);
    assert!(tokenizer.vocab_size() <= 500);
}
