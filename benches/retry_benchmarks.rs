//! Retry engine benchmarks for armature-http-retry

use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use std::time::{Duration, UNIX_EPOCH};

use armature_http_retry::{
    parse_retry_after, BackoffPolicy, ClientConfig, FailureKind, HeaderMap, HeaderValue, Method,
    Response, RetriableStatusTable, RetryClassifier, StatusCode, TransportError, Url,
};

fn backoff_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("backoff");

    let policy = BackoffPolicy::new();
    let capped = BackoffPolicy::new().with_max_delay(Duration::from_secs(30));

    group.bench_function("compute_wait", |b| {
        b.iter(|| {
            for attempt in 0..5 {
                black_box(policy.compute_wait(black_box(attempt), None));
            }
        });
    });

    group.bench_function("compute_wait_capped", |b| {
        b.iter(|| black_box(capped.compute_wait(black_box(12), None)));
    });

    group.bench_function("server_hint", |b| {
        b.iter(|| black_box(policy.compute_wait(3, black_box(Some(Duration::from_secs(2))))));
    });

    group.finish();
}

fn retry_after_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("retry_after");
    let now = UNIX_EPOCH + Duration::from_secs(1_445_412_480);

    group.bench_function("delta_seconds", |b| {
        b.iter(|| black_box(parse_retry_after(black_box("120"), now)));
    });

    group.bench_function("http_date", |b| {
        b.iter(|| black_box(parse_retry_after(black_box("Wed, 21 Oct 2015 07:30:00 GMT"), now)));
    });

    group.bench_function("malformed", |b| {
        b.iter(|| black_box(parse_retry_after(black_box("soon"), now)));
    });

    group.finish();
}

fn classify_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");

    let classifier = RetryClassifier::new(RetriableStatusTable::standard());
    let url = Url::parse("https://api.example.com/items").unwrap();
    let mut headers = HeaderMap::new();
    headers.insert("retry-after", HeaderValue::from_static("2"));
    let unavailable = Response::new(StatusCode::SERVICE_UNAVAILABLE, headers, "", url.clone());
    let ok = Response::new(StatusCode::OK, HeaderMap::new(), "ok", url);

    group.bench_function("success", |b| {
        b.iter(|| black_box(classifier.classify(&Method::GET, Ok(ok.clone()))));
    });

    group.bench_function("status_with_retry_after", |b| {
        b.iter(|| black_box(classifier.classify(&Method::GET, Ok(unavailable.clone()))));
    });

    group.bench_function("transport_failure_post", |b| {
        b.iter(|| {
            let error = TransportError::new(FailureKind::Connect, "connection refused");
            black_box(classifier.classify(&Method::POST, Err(error)))
        });
    });

    group.finish();
}

fn config_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("config");

    group.bench_function("build_and_validate", |b| {
        b.iter(|| {
            let config = ClientConfig::builder()
                .base_url("https://api.example.com")
                .request_timeout(Duration::from_secs(30))
                .max_attempts(4)
                .default_header("Accept", "application/json")
                .build();
            black_box(config.validate())
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    backoff_benchmark,
    retry_after_benchmark,
    classify_benchmark,
    config_benchmark,
);
criterion_main!(benches);
