use criterion::{criterion_group, criterion_main, Criterion};
use page_mirror::html_parser::{asset_file_name, resolve_reference};
use page_mirror::{HtmlDocument, Ledger, PageStats, ReferenceMap};
use std::hint::black_box;
use tempfile::tempdir;
use url::Url;

const HTML_CONTENT: &str = r#"
    <html>
        <head>
            <link rel="stylesheet" href="/style.css">
            <script src="/script.js"></script>
            <link rel="stylesheet" href="/theme.css">
            <script src="/utils.js"></script>
        </head>
        <body>
            <img src="/logo.png" alt="Logo">
            <img src="/banner.jpg" alt="Banner">
            <a href="/about">About</a>
            <a href="/contact">Contact</a>
            <a href="/products">Products</a>
        </body>
    </html>
"#;

fn bench_document_references(c: &mut Criterion) {
    let references = ReferenceMap::default();

    c.bench_function("parse_and_find_references", |b| {
        b.iter(|| {
            let document = HtmlDocument::parse(black_box(HTML_CONTENT));
            let mut found = 0;
            for (tag, attribute) in references.iter() {
                found += document
                    .find_all(tag)
                    .iter()
                    .filter(|element| element.has_attr(attribute))
                    .count();
            }
            found
        });
    });

    c.bench_function("page_stats", |b| {
        b.iter(|| PageStats::from_html(black_box(HTML_CONTENT)));
    });
}

fn bench_url_resolution(c: &mut Criterion) {
    let base = Url::parse("https://example.com/subdir/page").unwrap();
    let test_urls = vec![
        "../style.css",
        "./script.js",
        "images/photo.jpg",
        "https://cdn.example.com/style.css",
        "//cdn.example.com/script.js",
        "/assets/logo.png?v=12#top",
    ];

    c.bench_function("resolve_and_name_assets", |b| {
        b.iter(|| {
            for url in &test_urls {
                let resolved = resolve_reference(&base, black_box(url)).unwrap();
                black_box(asset_file_name(&resolved));
            }
        });
    });
}

fn bench_ledger_upsert(c: &mut Criterion) {
    let temp_dir = tempdir().unwrap();
    let ledger = Ledger::open(&temp_dir.path().join("metadata.csv"));
    for i in 0..100 {
        ledger
            .upsert(&format!("https://example.com/page/{}", i), i, i * 2)
            .unwrap();
    }

    c.bench_function("ledger_upsert_existing", |b| {
        b.iter(|| {
            ledger
                .upsert(black_box("https://example.com/page/50"), 3, 4)
                .unwrap()
        });
    });
}

criterion_group!(
    benches,
    bench_document_references,
    bench_url_resolution,
    bench_ledger_upsert
);
criterion_main!(benches);
