//! Graph compilation benchmarks over a dense synthetic timeline.
//! Run: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use clipnote::config::OverlayStyle;
use clipnote::filter_script::filter_script;
use clipnote::graph::OperationGraphBuilder;
use clipnote::interval::TrimWindow;
use clipnote::schema::Tracks;
use clipnote::tempo::decompose;

fn synthetic_tracks(events: usize) -> Tracks {
    let captions = (0..events)
        .map(|i| {
            format!(
                r#"{{ "time": {}, "text": "step {}", "useSequenceNumber": true }}"#,
                i as f64 * 0.5,
                i % 7
            )
        })
        .collect::<Vec<_>>()
        .join(",");
    let shapes = (0..events)
        .map(|i| {
            let continuation = if i % 3 == 0 { "false" } else { "true" };
            format!(
                r#"{{ "time": {}, "type": "line", "x1": 0, "y1": 0, "x2": {}, "y2": {}, "continuation": {continuation} }}"#,
                i as f64 * 0.5,
                40 + i % 50,
                30 + i % 20
            )
        })
        .collect::<Vec<_>>()
        .join(",");
    serde_json::from_str(&format!(
        r#"{{ "captions": [{captions}], "shapes": [{shapes}] }}"#
    ))
    .expect("synthetic tracks parse")
}

fn bench_compile(c: &mut Criterion) {
    let tracks = synthetic_tracks(500);
    let style = OverlayStyle::default();
    let trim = TrimWindow::new(10.0, 200.0).expect("trim");

    let mut group = c.benchmark_group("compile_graph");
    group.sample_size(50);

    group.bench_function("build_500_captions_500_lines", |b| {
        b.iter(|| {
            OperationGraphBuilder::new(&style)
                .build(black_box(&tracks), trim, None)
                .expect("build")
        });
    });

    let graph = OperationGraphBuilder::new(&style)
        .build(&tracks, trim, None)
        .expect("build")
        .expect("graph");
    group.bench_function("filter_script_500_captions_500_lines", |b| {
        b.iter(|| black_box(filter_script(&graph, &style)));
    });

    group.bench_function("decompose_extreme_speeds", |b| {
        b.iter(|| {
            for speed in [0.01, 0.3, 3.0, 100.0] {
                black_box(decompose(black_box(speed)).expect("plan"));
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_compile);
criterion_main!(benches);
