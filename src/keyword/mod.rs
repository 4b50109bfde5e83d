//! Keyword relevance scoring — pure, stateless functions.
//!
//! The pipeline: [`tokenize`] lowercases, strips punctuation, and canonicalizes
//! tokens through a small stemming/synonym table; [`extract_keywords`] adds
//! adjacent bigrams/trigrams (joined with `_`) to the unigram set;
//! [`keyword_overlap`] computes a weighted Jaccard-style overlap where n-gram
//! hits count double; [`bm25_score`] ranks by term frequency against a
//! caller-supplied corpus-size estimate; [`keyword_filter`] combines all of it
//! into one score per record.

pub mod classify;

use std::collections::{HashMap, HashSet};

/// BM25 term-frequency saturation constant.
const BM25_K1: f64 = 1.2;
/// BM25 length-normalization constant.
const BM25_B: f64 = 0.75;
/// Assumed average document length, in terms. Callers supply a corpus-size
/// estimate but not a length index, so normalization is anchored here.
const BM25_AVG_DOC_LEN: f64 = 32.0;

/// Weights for the combined filter score.
const OVERLAP_WEIGHT: f64 = 0.6;
const PHRASE_BONUS: f64 = 0.25;
const BM25_WEIGHT: f64 = 0.15;

/// Canonical unigram sequence: lowercase, punctuation stripped, whitespace
/// tokenized, short tokens dropped, stem/synonym table applied. Order and
/// duplicates are preserved (BM25 needs the multiset).
pub fn tokenize(text: &str, min_len: usize) -> Vec<String> {
    text.split_whitespace()
        .map(|raw| {
            raw.chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|t| t.len() >= min_len)
        .map(|t| canonicalize(&t))
        .collect()
}

/// Canonical token set for overlap scoring: unigrams plus all adjacent
/// bigrams and trigrams joined with `_`.
pub fn extract_keywords(text: &str, min_len: usize) -> HashSet<String> {
    let unigrams = tokenize(text, min_len);
    let mut out: HashSet<String> = unigrams.iter().cloned().collect();

    for pair in unigrams.windows(2) {
        out.insert(pair.join("_"));
    }
    for triple in unigrams.windows(3) {
        out.insert(triple.join("_"));
    }
    out
}

/// Map a token to its canonical form: synonym table first, then a small
/// suffix-stripping stemmer.
fn canonicalize(token: &str) -> String {
    let mapped = match token {
        "k8s" => "kubernetes",
        "js" => "javascript",
        "ts" => "typescript",
        "py" => "python",
        "db" | "dbs" => "database",
        "repo" | "repos" => "repository",
        "config" | "configs" | "cfg" => "configuration",
        "auth" => "authentication",
        "doc" | "docs" => "documentation",
        "env" | "envs" => "environment",
        other => other,
    };
    stem(mapped)
}

fn stem(token: &str) -> String {
    if token.len() > 5 && token.ends_with("ing") {
        return token[..token.len() - 3].to_string();
    }
    if token.len() > 4 && token.ends_with("ies") {
        return format!("{}y", &token[..token.len() - 3]);
    }
    if token.len() > 3
        && token.ends_with('s')
        && !token.ends_with("ss")
        && !token.ends_with("us")
        && !token.ends_with("is")
    {
        return token[..token.len() - 1].to_string();
    }
    token.to_string()
}

/// Weight of a single token: n-grams (tokens containing the join separator)
/// count double relative to unigrams.
fn token_weight(token: &str) -> f64 {
    if token.contains('_') {
        2.0
    } else {
        1.0
    }
}

/// Weighted Jaccard-style overlap: matched query weight over total query
/// weight. Returns a value in `[0, 1]`; 0 for an empty query.
pub fn keyword_overlap(query: &HashSet<String>, content: &HashSet<String>) -> f64 {
    if query.is_empty() {
        return 0.0;
    }
    let mut total = 0.0;
    let mut matched = 0.0;
    for token in query {
        let w = token_weight(token);
        total += w;
        if content.contains(token) {
            matched += w;
        }
    }
    matched / total
}

/// Case-insensitive contiguous substring test. Not tokenized — punctuation
/// inside the content breaks a match.
pub fn exact_phrase_match(query: &str, content: &str) -> bool {
    if query.trim().is_empty() {
        return false;
    }
    content.to_lowercase().contains(&query.trim().to_lowercase())
}

/// Standard BM25 over the document term multiset.
///
/// Document frequency is unknown here, so IDF is approximated against the
/// caller's `corpus_size` estimate with each query term assumed rare
/// (df = 1). Larger corpora therefore score matches higher; the shape in
/// term frequency is the usual saturating curve.
pub fn bm25_score(query_terms: &[String], doc_terms: &[String], corpus_size: usize) -> f64 {
    if query_terms.is_empty() || doc_terms.is_empty() {
        return 0.0;
    }

    let n = corpus_size.max(1) as f64;
    let idf = (1.0 + (n - 0.5) / 1.5).ln();
    let doc_len = doc_terms.len() as f64;
    let norm = 1.0 - BM25_B + BM25_B * (doc_len / BM25_AVG_DOC_LEN);

    let mut tf: HashMap<&str, f64> = HashMap::new();
    for term in doc_terms {
        *tf.entry(term.as_str()).or_insert(0.0) += 1.0;
    }

    let mut score = 0.0;
    let query_unique: HashSet<&str> = query_terms.iter().map(|t| t.as_str()).collect();
    for term in query_unique {
        let Some(freq) = tf.get(term) else { continue };
        score += idf * (freq * (BM25_K1 + 1.0)) / (freq + BM25_K1 * norm);
    }
    score
}

/// Combined keyword relevance for a batch of records: weighted overlap, an
/// exact-phrase bonus, and a squashed BM25 component. Records scoring below
/// `threshold` are dropped.
///
/// Quirk, preserved deliberately: an empty query scores every record 0, so a
/// non-positive threshold admits everything ("match all").
pub fn keyword_filter(
    query: &str,
    records: &[(&str, &str)],
    threshold: f64,
    min_len: usize,
) -> HashMap<String, f64> {
    let query_set = extract_keywords(query, min_len);
    let query_terms = tokenize(query, min_len);
    let corpus_size = records.len();

    let mut out = HashMap::new();
    for (id, content) in records {
        let content_set = extract_keywords(content, min_len);
        let overlap = keyword_overlap(&query_set, &content_set);

        let phrase = if exact_phrase_match(query, content) {
            PHRASE_BONUS
        } else {
            0.0
        };

        let doc_terms = tokenize(content, min_len);
        let bm25 = bm25_score(&query_terms, &doc_terms, corpus_size);
        let bm25_squashed = bm25 / (1.0 + bm25);

        let score = OVERLAP_WEIGHT * overlap + phrase + BM25_WEIGHT * bm25_squashed;
        if score >= threshold {
            out.insert(id.to_string(), score);
        }
    }
    out
}
