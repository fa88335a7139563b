use std::hint::black_box;
use std::io::Write;

use bencher::{TestCase, TestPayload};
use bytes::Bytes;
use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use flate2::write::GzEncoder;
use flate2::Compression;
use http::header::{CONTENT_ENCODING, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue};
use http_body_util::Full;
use micro_payload::{parse, Output, ParseMode, ParseOptions, ParseRequest};
use tokio::runtime::Runtime;

static SMALL_JSON: TestPayload =
    TestPayload::new("small.json", "application/json", include_str!("../resources/payload/small.json"));
static LARGE_JSON: TestPayload =
    TestPayload::new("large.json", "application/json", include_str!("../resources/payload/large.json"));
static FORM: TestPayload =
    TestPayload::new("form.txt", "application/x-www-form-urlencoded", include_str!("../resources/payload/form.txt"));
static MULTIPART: TestPayload = TestPayload::new(
    "multipart.txt",
    "multipart/form-data; boundary=AaB03x",
    include_str!("../resources/payload/multipart.txt"),
);

fn create_test_cases() -> Vec<TestCase> {
    vec![
        TestCase::small("small_json", SMALL_JSON),
        TestCase::large("large_json", LARGE_JSON),
        TestCase::normal("form", FORM),
        TestCase::normal("multipart", MULTIPART),
    ]
}

fn request(content_type: &'static str, encoding: Option<&'static str>, body: Bytes) -> ParseRequest<Full<Bytes>> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    if let Some(encoding) = encoding {
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static(encoding));
    }
    ParseRequest::new(headers, Full::new(body))
}

fn gzip(body: &[u8]) -> Bytes {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(body).expect("writing into a vec should not fail");
    Bytes::from(encoder.finish().expect("writing into a vec should not fail"))
}

fn benchmark_parse(criterion: &mut Criterion) {
    let runtime = Runtime::new().expect("tokio runtime should start");
    let options = ParseOptions::builder(ParseMode::On, Output::Data).build();
    let mut group = criterion.benchmark_group("parse");

    for case in create_test_cases() {
        let payload = case.payload();
        let body = payload.body();

        group.throughput(Throughput::Bytes(body.len() as u64));
        group.bench_with_input(BenchmarkId::new(case.group().name(), case.name()), &body, |b, body| {
            b.iter_batched(
                || request(payload.content_type(), None, body.clone()),
                |request| {
                    let parsed = runtime.block_on(parse(request, None, &options)).expect("payload should parse");
                    black_box(parsed);
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn benchmark_gzip(criterion: &mut Criterion) {
    let runtime = Runtime::new().expect("tokio runtime should start");
    let options = ParseOptions::builder(ParseMode::On, Output::Data).build();
    let mut group = criterion.benchmark_group("parse_gzip");

    for payload in [SMALL_JSON, LARGE_JSON] {
        let compressed = gzip(&payload.body());

        group.throughput(Throughput::Bytes(compressed.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(payload.file_name()), &compressed, |b, compressed| {
            b.iter_batched(
                || request(payload.content_type(), Some("gzip"), compressed.clone()),
                |request| {
                    let parsed = runtime.block_on(parse(request, None, &options)).expect("payload should parse");
                    black_box(parsed);
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_parse, benchmark_gzip);
criterion_main!(benches);
