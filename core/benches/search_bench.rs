use criterion::{criterion_group, criterion_main, Criterion};
use reelfuse_core::bm25::bm25_search;
use reelfuse_core::{InvertedIndex, RawDocument, Tokenizer};
use std::sync::Arc;

const WORDS: &[&str] = &[
    "bear", "shark", "space", "cowboy", "london", "revenge", "heist", "detective", "dragon", "robot",
    "island", "winter", "family", "secret", "war", "ocean", "city", "ghost", "train", "king",
];

fn synthetic_corpus(n: u32) -> Vec<RawDocument> {
    (1..=n)
        .map(|id| {
            let description: Vec<&str> = (0..40).map(|i| WORDS[((id as usize) * 7 + i * 13) % WORDS.len()]).collect();
            RawDocument {
                id: Some(id),
                title: format!("{} {}", WORDS[id as usize % WORDS.len()], id),
                description: description.join(" "),
            }
        })
        .collect()
}

fn bench_tokenize(c: &mut Criterion) {
    let tokenizer = Tokenizer::default();
    let text = "A young hunter is turned into a bear and learns about his brother while \
                travelling across the frozen wilderness to find the mountain where the lights touch the earth.";
    c.bench_function("tokenize_description", |b| b.iter(|| tokenizer.tokenize(text)));
}

fn bench_bm25(c: &mut Criterion) {
    let index = InvertedIndex::build(Arc::new(Tokenizer::default()), synthetic_corpus(5_000)).unwrap();
    c.bench_function("bm25_search_5k", |b| b.iter(|| bm25_search(&index, "bear detective in the ocean city", 10)));
}

criterion_group!(benches, bench_tokenize, bench_bm25);
criterion_main!(benches);
