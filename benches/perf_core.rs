use criterion::{black_box, criterion_group, criterion_main, Criterion};
use faultfix::llm::ModelResponseValidator;
use faultfix::telemetry::{RawPayload, TelemetryPayloadBuilder};
use faultfix::trace::parse_stack;
use serde_json::json;

fn synthetic_stack(frame_count: usize) -> String {
    let mut stack = String::from("TypeError: Cannot read properties of undefined\n");
    for i in 0..frame_count {
        match i % 3 {
            0 => stack.push_str(&format!(
                "    at handler_{i} (http://localhost:5173/src/feature_{:02}/view_{i}.jsx?t=17:{}:{})\n",
                i % 40,
                i + 1,
                i % 80 + 1
            )),
            1 => stack.push_str(&format!(
                "    at http://localhost:5173/node_modules/.vite/deps/react-dom.js:{}:{}\n",
                i * 7 + 1,
                i % 50 + 1
            )),
            _ => stack.push_str(&format!(
                "render_{i}@http://localhost:5173/src/components/Widget_{i}.jsx:{}:{}\n",
                i + 3,
                i % 20 + 1
            )),
        }
    }
    stack
}

fn bench_parse_stack(c: &mut Criterion) {
    let small = synthetic_stack(12);
    c.bench_function("parse_stack_12_frames", |b| {
        b.iter(|| black_box(parse_stack(black_box(&small))));
    });

    let large = synthetic_stack(500);
    c.bench_function("parse_stack_500_frames", |b| {
        b.iter(|| black_box(parse_stack(black_box(&large))));
    });
}

fn bench_build_event(c: &mut Criterion) {
    let payload = RawPayload::from_value(json!({
        "error": {
            "message": "Cannot read properties of undefined",
            "name": "TypeError",
            "stack": synthetic_stack(40),
            "cause": { "message": "fetch failed", "stack": synthetic_stack(10) }
        },
        "callSite": { "stack": synthetic_stack(20) },
        "meta": {
            "url": "http://localhost:5173/checkout?step=2",
            "userAgent": "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
            "environment": "production"
        }
    }))
    .expect("benchmark payload should parse");
    let builder = TelemetryPayloadBuilder::default();

    c.bench_function("build_error_event", |b| {
        b.iter(|| black_box(builder.build(black_box(&payload))));
    });
}

fn bench_validate_reply(c: &mut Criterion) {
    let validator = ModelResponseValidator::default();
    let good = json!({
        "response": json!({
            "summary": "Guard undefined user",
            "problemAnalysis": "user is undefined before the fetch resolves",
            "fixStrategy": "Optional chaining",
            "fixContent": "- use user?.name",
            "fixCode": "export default function App() { return null; }",
            "testSteps": ["Open the page", "Reload"],
            "riskLevel": "LOW"
        })
        .to_string()
    });
    c.bench_function("validate_reply_valid", |b| {
        b.iter(|| black_box(validator.validate(black_box(&good))));
    });

    let prose = json!({
        "response": format!("Sure! Here is the fix:\n```json\n{}\n```\nLet me know.", "{\"summary\": \"x\"}")
    });
    c.bench_function("validate_reply_fallback", |b| {
        b.iter(|| black_box(validator.validate(black_box(&prose))));
    });
}

criterion_group!(
    benches,
    bench_parse_stack,
    bench_build_event,
    bench_validate_reply
);
criterion_main!(benches);
