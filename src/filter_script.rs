//! ffmpeg filtergraph encoding of an [`OperationGraph`].
//!
//! Literal strings pass through two parsers: the filtergraph parser, then the
//! filter's own option parser. [`escape_text`] escapes for both. Expressions are
//! wrapped in single quotes so their commas survive the filtergraph parser.

use std::fmt::Write as _;

use crate::config::OverlayStyle;
use crate::coords::PixelPoint;
use crate::graph::{OperationGraph, OperationKind, ParamValue, RenderOperation};
use crate::interval::VisibilityWindow;
use crate::tempo::TempoPlan;

pub const SOURCE_VIDEO: &str = "0:v";
/// Horizontal gap between an arrow glyph and its label, in glyph heights.
const LABEL_GAP: f64 = 1.1;

/// Renders the graph as a `-filter_complex` script.
pub fn filter_script(graph: &OperationGraph, style: &OverlayStyle) -> String {
    graph
        .nodes()
        .iter()
        .map(|node| render_node(node, style))
        .collect::<Vec<_>>()
        .join(";")
}

fn render_node(node: &RenderOperation, style: &OverlayStyle) -> String {
    let input = node
        .input_label
        .as_ref()
        .map_or(SOURCE_VIDEO, |label| label.as_str());
    let mut out = format!("[{input}]");
    out.push_str(&node_filters(node, style).join(","));
    if let Some(label) = &node.output_label {
        let _ = write!(out, "[{label}]");
    }
    out
}

fn node_filters(node: &RenderOperation, style: &OverlayStyle) -> Vec<String> {
    match node.kind {
        OperationKind::Pad => vec![simple_filter("pad", node, &[])],
        OperationKind::DrawBox => vec![simple_filter("drawbox", node, &[])],
        OperationKind::DrawText => vec![drawtext(node, style, &["label"])],
        OperationKind::Glyph => {
            let mut filters = vec![drawtext(node, style, &["label"])];
            if let Some(label) = label_filter(node, style) {
                filters.push(label);
            }
            filters
        }
        OperationKind::Stamps => stamp_filters(node),
    }
}

fn simple_filter(name: &str, node: &RenderOperation, skip: &[&str]) -> String {
    let mut options = node
        .parameters
        .iter()
        .filter(|(key, _)| !skip.contains(key))
        .map(|(key, value)| format!("{key}={}", render_value(value)))
        .collect::<Vec<_>>();
    if let Some(window) = node.visibility {
        options.push(enable_option(window));
    }
    format!("{name}={}", options.join(":"))
}

fn drawtext(node: &RenderOperation, style: &OverlayStyle, skip: &[&str]) -> String {
    let mut options = Vec::with_capacity(node.parameters.len() + 2);
    for (key, value) in &node.parameters {
        if skip.contains(key) {
            continue;
        }
        match (*key, value) {
            ("font", ParamValue::Text(family)) => options.push(font_option(family, style)),
            _ => options.push(format!("{key}={}", render_value(value))),
        }
    }
    options.push("expansion=none".to_owned());
    if let Some(window) = node.visibility {
        options.push(enable_option(window));
    }
    format!("drawtext={}", options.join(":"))
}

fn label_filter(node: &RenderOperation, style: &OverlayStyle) -> Option<String> {
    let Some(ParamValue::Text(label)) = node.param("label") else {
        return None;
    };
    let font_size = match node.param("fontsize") {
        Some(ParamValue::Int(size)) => *size,
        _ => return None,
    };
    let (Some(ParamValue::Int(x)), Some(ParamValue::Int(y))) = (node.param("x"), node.param("y"))
    else {
        return None;
    };
    let label_x = x + (font_size as f64 * LABEL_GAP).round() as i64;
    let mut options = vec![
        format!("text={}", escape_text(label)),
        format!("fontsize={}", (font_size / 2).max(1)),
        format!("x={label_x}"),
        format!("y={}", y + font_size / 4),
    ];
    if let Some(color) = node.param("fontcolor") {
        options.push(format!("fontcolor={}", render_value(color)));
    }
    options.push(font_option(&style.default_font, style));
    options.push("expansion=none".to_owned());
    if let Some(window) = node.visibility {
        options.push(enable_option(window));
    }
    Some(format!("drawtext={}", options.join(":")))
}

fn stamp_filters(node: &RenderOperation) -> Vec<String> {
    let Some(ParamValue::Points(points)) = node.param("points") else {
        return Vec::new();
    };
    let size = match node.param("size") {
        Some(ParamValue::Int(size)) => *size,
        _ => 1,
    };
    let color = node
        .param("color")
        .map(render_value)
        .unwrap_or_else(|| "red".to_owned());
    let enable = node.visibility.map(enable_option);
    points
        .iter()
        .map(|PixelPoint { x, y }| {
            let mut filter = format!("drawbox=x={x}:y={y}:w={size}:h={size}:color={color}:t=fill");
            if let Some(enable) = &enable {
                filter.push(':');
                filter.push_str(enable);
            }
            filter
        })
        .collect()
}

fn font_option(family: &str, style: &OverlayStyle) -> String {
    match style.font_file(family) {
        Some(path) => format!("fontfile={}", escape_text(&path.to_string_lossy())),
        None => format!("font={}", escape_text(family)),
    }
}

fn render_value(value: &ParamValue) -> String {
    match value {
        ParamValue::Int(value) => value.to_string(),
        ParamValue::Float(value) => format_number(*value),
        ParamValue::Text(text) => escape_text(text),
        ParamValue::Expr(expr) => format!("'{expr}'"),
        ParamValue::Color(color) => escape_text(color),
        ParamValue::Points(points) => points
            .iter()
            .map(|point| format!("{}x{}", point.x, point.y))
            .collect::<Vec<_>>()
            .join(" "),
    }
}

/// Escapes literal text for a filter option inside a filtergraph.
pub fn escape_text(text: &str) -> String {
    let mut option_level = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '\\' | '\'' | ':') {
            option_level.push('\\');
        }
        option_level.push(ch);
    }
    let mut graph_level = String::with_capacity(option_level.len());
    for ch in option_level.chars() {
        if matches!(ch, '\\' | '\'' | '[' | ']' | ',' | ';') {
            graph_level.push('\\');
        }
        graph_level.push(ch);
    }
    graph_level
}

/// Half-open visibility predicate: on from `start`, off at `end`.
pub fn enable_option(window: VisibilityWindow) -> String {
    format!(
        "enable='gte(t,{})*lt(t,{})'",
        format_number(window.start),
        format_number(window.end)
    )
}

/// Video filter for a speed change: presentation timestamps divided by `speed`.
pub fn video_tempo_filter(plan: &TempoPlan) -> String {
    format!("setpts=PTS/{}", format_number(plan.speed()))
}

/// Audio filter chain, one `atempo` per step.
pub fn audio_tempo_filter(plan: &TempoPlan) -> String {
    plan.steps()
        .iter()
        .map(|step| format!("atempo={}", format_number(step.factor)))
        .collect::<Vec<_>>()
        .join(",")
}

fn format_number(value: f64) -> String {
    let text = format!("{value:.6}");
    let trimmed = text.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() || trimmed == "-0" {
        "0".to_owned()
    } else {
        trimmed.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::OperationGraphBuilder;
    use crate::interval::TrimWindow;
    use crate::schema::{TextAlign, TextCaption, TimelineEvent, Tracks};
    use crate::tempo::decompose;

    fn caption(time: f64, text: &str) -> TimelineEvent {
        TimelineEvent::TextCaption(TextCaption {
            time,
            text: text.to_owned(),
            text_color: "#000000".to_owned(),
            bg_color: "#FFFFFF".to_owned(),
            font: None,
            align: TextAlign::Center,
            use_sequence_number: false,
            continuation: None,
        })
    }

    #[test]
    fn escapes_option_and_graph_specials() {
        assert_eq!(escape_text("plain text"), "plain text");
        assert_eq!(escape_text("a:b"), r"a\\:b");
        assert_eq!(escape_text("it's"), r"it\\\'s");
        assert_eq!(escape_text("x,y;[z]"), r"x\,y\;\[z\]");
        assert_eq!(escape_text(r"c:\dir"), r"c\\:\\\\dir");
    }

    #[test]
    fn enable_predicate_is_half_open() {
        let option = enable_option(VisibilityWindow {
            start: 1.0,
            end: 4.25,
        });
        assert_eq!(option, "enable='gte(t,1)*lt(t,4.25)'");
    }

    #[test]
    fn script_chains_nodes_through_labels() {
        let tracks = Tracks {
            captions: vec![caption(1.0, "Intro"), caption(4.0, "Time: 10, done")],
            ..Tracks::default()
        };
        let style = OverlayStyle::default();
        let graph = OperationGraphBuilder::new(&style)
            .build(&tracks, TrimWindow::new(0.0, 6.0).expect("trim"), None)
            .expect("build")
            .expect("graph");
        let script = filter_script(&graph, &style);
        let nodes = script.split(';').collect::<Vec<_>>();
        assert_eq!(nodes.len(), 3);
        assert_eq!(
            nodes[0],
            "[0:v]pad=color=white:height='ih+150':width='iw':x=0:y=0[padded]"
        );
        assert!(nodes[1].starts_with("[padded]drawtext="));
        assert!(nodes[1].ends_with("[filter1]"));
        assert!(nodes[1].contains("enable='gte(t,1)*lt(t,4)'"));
        assert!(nodes[2].starts_with("[filter1]drawtext="));
        assert!(nodes[2].contains(r"text=Time\\: 10\, done"));
        assert!(nodes[2].contains("font=Noto Sans JP"));
        assert!(!nodes[2].ends_with(']'));
    }

    #[test]
    fn mapped_fonts_use_fontfile() {
        let mut style = OverlayStyle::default();
        style
            .font_files
            .insert("Noto Sans JP".to_owned(), "/fonts/NotoSansJP.ttf".into());
        assert_eq!(
            font_option("Noto Sans JP", &style),
            "fontfile=/fonts/NotoSansJP.ttf"
        );
        assert_eq!(font_option("Arial", &style), "font=Arial");
    }

    #[test]
    fn tempo_filters_follow_the_plan() {
        let plan = decompose(3.0).expect("plan");
        assert_eq!(video_tempo_filter(&plan), "setpts=PTS/3");
        assert_eq!(audio_tempo_filter(&plan), "atempo=2,atempo=1.5");
    }
}
