use clipnote::config::OverlayStyle;
use clipnote::error_codes::{TrackKind, INVALID_EVENT};
use clipnote::filter_script::filter_script;
use clipnote::graph::{OperationGraphBuilder, OperationKind, ParamValue};
use clipnote::interval::{resolve, TrimWindow};
use clipnote::schema::{RenderRequest, TimelineEvent, Tracks};
use clipnote::tempo::decompose;

fn tracks(json: &str) -> Tracks {
    serde_json::from_str(json).expect("tracks should parse")
}

fn trim(start: f64, duration: f64) -> TrimWindow {
    TrimWindow::new(start, duration).expect("trim should be valid")
}

#[test]
fn captions_run_until_the_next_caption() {
    let tracks = tracks(
        r#"{ "captions": [
            { "time": 1.0, "text": "Intro" },
            { "time": 4.0, "text": "Outro" }
        ] }"#,
    );
    let resolved = resolve(TrackKind::Captions, &tracks.captions, trim(0.0, 6.0)).expect("resolve");
    let windows = resolved
        .iter()
        .map(|r| (r.index, r.window.start, r.window.end))
        .collect::<Vec<_>>();
    assert_eq!(windows, vec![(0, 1.0, 4.0), (1, 4.0, 6.0)]);
}

#[test]
fn shape_with_end_marker_closes_at_the_marker() {
    let tracks = tracks(
        r#"{ "shapes": [
            { "time": 2.0, "type": "rectangle", "x1": 0, "y1": 0, "x2": 10, "y2": 10, "continuation": false },
            { "time": 5.0, "type": "" }
        ] }"#,
    );
    let resolved = resolve(TrackKind::Shapes, &tracks.shapes, trim(0.0, 10.0)).expect("resolve");
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].window.start, 2.0);
    assert_eq!(resolved[0].window.end, 5.0);
}

#[test]
fn tempo_plans_for_out_of_range_speeds() {
    assert_eq!(decompose(3.0).expect("plan").factors(), vec![2.0, 1.5]);
    let slow = decompose(0.3).expect("plan").factors();
    assert_eq!(slow.len(), 3);
    assert_eq!(&slow[..2], &[0.5, 0.5]);
    assert!((slow[2] - 1.2).abs() < 1e-9);
    assert_eq!(decompose(1.0).expect("plan").factors(), vec![1.0]);
    assert_eq!(decompose(0.75).expect("plan").factors(), vec![0.75]);
}

#[test]
fn windows_stay_inside_the_trim() {
    let tracks = tracks(
        r#"{ "captions": [
            { "time": 0.0, "text": "a" },
            { "time": 0.5, "text": "b", "continuation": true },
            { "time": 3.0, "text": "c", "continuation": false },
            { "time": 3.0, "text": "d" },
            { "time": 7.25, "text": "" },
            { "time": 9.0, "text": "e" },
            { "time": 40.0, "text": "f" }
        ] }"#,
    );
    for (start, duration) in [(0.0, 10.0), (2.0, 3.0), (3.0, 0.5), (8.0, 30.0), (0.25, 0.25)] {
        let resolved =
            resolve(TrackKind::Captions, &tracks.captions, trim(start, duration)).expect("resolve");
        for r in resolved {
            assert!(r.window.start >= 0.0, "{r:?}");
            assert!(r.window.start < r.window.end, "{r:?}");
            assert!(r.window.end <= duration, "{r:?}");
        }
    }
}

#[test]
fn nothing_is_visible_at_or_after_an_end_marker() {
    let tracks = tracks(
        r#"{ "captions": [
            { "time": 1.0, "text": "one" },
            { "time": 2.0, "text": "two", "continuation": true },
            { "time": 2.0, "text": "three", "continuation": true },
            { "time": 6.0, "text": " " },
            { "time": 8.0, "text": "after" }
        ] }"#,
    );
    let resolved = resolve(TrackKind::Captions, &tracks.captions, trim(0.0, 10.0)).expect("resolve");
    for r in &resolved {
        if r.index < 3 {
            assert!(r.window.end <= 6.0, "{r:?}");
        } else {
            assert!(r.window.start >= 8.0, "{r:?}");
        }
    }
    assert_eq!(resolved.len(), 4);
}

#[test]
fn graph_orders_tracks_and_wires_every_node() {
    let tracks = tracks(
        r##"{
            "captions": [ { "time": 1.0, "text": "Intro" } ],
            "shapes": [
                { "time": 0.5, "type": "rectangle", "x1": 10, "y1": 20, "x2": 60, "y2": 80 },
                { "time": 0.5, "type": "line", "x1": 0, "y1": 0, "x2": 30, "y2": 40, "lineWidth": 5 }
            ],
            "detailCaptions": [ { "time": 2.0, "text": "small print", "bgColor": "#222222" } ],
            "arrows": [ { "time": 3.0, "type": "left", "x": 100, "y": 50 } ]
        }"##,
    );
    let style = OverlayStyle::default();
    let graph = OperationGraphBuilder::new(&style)
        .build(&tracks, trim(0.0, 8.0), None)
        .expect("build")
        .expect("graph");

    let kinds = graph.nodes().iter().map(|node| node.kind).collect::<Vec<_>>();
    assert_eq!(
        kinds,
        vec![
            OperationKind::Pad,
            OperationKind::DrawBox,
            OperationKind::Stamps,
            OperationKind::DrawText,
            OperationKind::DrawText,
            OperationKind::Glyph,
        ]
    );
    assert!(graph.is_wired());
    assert_eq!(graph.labels().len(), graph.visual_len());
    assert!(graph.nodes()[0].input_label.is_none());
    assert!(graph.nodes()[0].output_label.is_some());
    assert!(graph.nodes().last().and_then(|node| node.output_label.as_ref()).is_none());
    for pair in graph.nodes().windows(2) {
        assert_eq!(pair[0].output_label, pair[1].input_label);
    }

    let detail = &graph.nodes()[4];
    assert_eq!(
        detail.param("boxcolor"),
        Some(&ParamValue::Color("#222222@0.7".to_owned()))
    );
    let arrow = &graph.nodes()[5];
    assert_eq!(arrow.param("fontcolor"), Some(&ParamValue::Color("#1976D2".to_owned())));
    assert_eq!(arrow.param("fontsize"), Some(&ParamValue::Int(50)));
    let arrow_window = arrow.visibility.expect("arrow window");
    assert_eq!((arrow_window.start, arrow_window.end), (3.0, 8.0));
}

#[test]
fn scaled_geometry_uses_actual_pixels() {
    let request: RenderRequest = serde_json::from_str(
        r#"{
            "trimStart": 0,
            "trimDuration": 5,
            "videoScale": { "actualWidth": 1920, "actualHeight": 1080, "displayWidth": 960, "displayHeight": 540 },
            "shapes": [ { "time": 0, "type": "rectangle", "x1": 100, "y1": 50, "x2": 10, "y2": 20 } ]
        }"#,
    )
    .expect("request should parse");
    let style = OverlayStyle::default();
    let graph = OperationGraphBuilder::new(&style)
        .build(&request.tracks, trim(0.0, 5.0), request.video_scale)
        .expect("build")
        .expect("graph");
    let rect = &graph.nodes()[1];
    assert_eq!(rect.param("x"), Some(&ParamValue::Int(20)));
    assert_eq!(rect.param("y"), Some(&ParamValue::Int(40)));
    assert_eq!(rect.param("w"), Some(&ParamValue::Int(180)));
    assert_eq!(rect.param("h"), Some(&ParamValue::Int(60)));
    assert_eq!(rect.param("t"), Some(&ParamValue::Int(6)));
}

#[test]
fn caption_text_is_escaped_in_the_script() {
    let tracks = tracks(
        r#"{ "captions": [ { "time": 0.0, "text": "Don't stop: 1,2;3" } ] }"#,
    );
    let style = OverlayStyle::default();
    let graph = OperationGraphBuilder::new(&style)
        .build(&tracks, trim(0.0, 3.0), None)
        .expect("build")
        .expect("graph");
    let script = filter_script(&graph, &style);
    assert!(
        script.contains(r"text=Don\\\'t stop\\: 1\,2\;3"),
        "{script}"
    );
}

#[test]
fn invalid_times_abort_graph_assembly() {
    let tracks = Tracks {
        arrows: vec![TimelineEvent::EndMarker { time: -2.0 }],
        ..Tracks::default()
    };
    let style = OverlayStyle::default();
    let error = OperationGraphBuilder::new(&style)
        .build(&tracks, trim(0.0, 3.0), None)
        .expect_err("negative time");
    assert_eq!(error.code(), INVALID_EVENT);
}
