//! Assembly of the overlay operation graph.
//!
//! The graph is a straight chain: a pad node that extends the canvas with the
//! caption strip, followed by one node per visible shape, caption, detail
//! caption and arrow marker, in that order. Each node reads the previous node's
//! output label; the last node writes the implicit output stream.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::Serialize;

use crate::config::OverlayStyle;
use crate::coords::{Axis, CoordinateTransformer, PixelPoint};
use crate::error_codes::{CompileError, TrackKind};
use crate::interval::{resolve, resolve_persistent, Resolved, TrimWindow, VisibilityWindow};
use crate::schema::{
    Arrow, DetailCaption, Direction, Point, Shape, ShapeKind, TextAlign, TextCaption,
    TimelineEvent, Tracks, VideoScale,
};

/// Arrow glyph size before scaling, in display pixels.
const SHAPE_ARROW_FONT_SIZE: f64 = 40.0;
const SHAPE_ARROW_OFFSET_X: f64 = 20.0;
const SHAPE_ARROW_OFFSET_Y: f64 = 10.0;
/// Arrow markers are `size` units tall, each unit this many display pixels.
const ARROW_MARKER_UNIT: f64 = 10.0;
const DETAIL_BOX_BORDER: i64 = 8;
const DETAIL_STRIP_GAP: u32 = 10;
/// Upper bound on the gaps in one stamped diagonal line.
pub const MAX_STAMPS: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Canvas extension below the frame.
    Pad,
    DrawBox,
    /// Filled squares stamped along a diagonal segment.
    Stamps,
    DrawText,
    /// Arrow symbol, optionally with a label next to it.
    Glyph,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    /// Literal text. Must be escaped by the engine adapter.
    Text(String),
    /// Engine expression such as `(w-text_w)/2`.
    Expr(String),
    Color(String),
    Points(Vec<PixelPoint>),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Label(String);

impl Label {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderOperation {
    pub kind: OperationKind,
    pub parameters: BTreeMap<&'static str, ParamValue>,
    pub input_label: Option<Label>,
    pub output_label: Option<Label>,
    pub visibility: Option<VisibilityWindow>,
}

impl RenderOperation {
    fn new(kind: OperationKind, visibility: Option<VisibilityWindow>) -> Self {
        Self {
            kind,
            parameters: BTreeMap::new(),
            input_label: None,
            output_label: None,
            visibility,
        }
    }

    fn with(mut self, name: &'static str, value: ParamValue) -> Self {
        self.parameters.insert(name, value);
        self
    }

    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.parameters.get(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationGraph {
    nodes: Vec<RenderOperation>,
}

impl OperationGraph {
    pub fn nodes(&self) -> &[RenderOperation] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes drawn on top of the padded canvas.
    pub fn visual_len(&self) -> usize {
        self.nodes.len().saturating_sub(1)
    }

    /// Every label the builder generated, in chain order.
    pub fn labels(&self) -> Vec<&Label> {
        self.nodes
            .iter()
            .filter_map(|node| node.output_label.as_ref())
            .collect()
    }

    /// Checks the chain invariant: the first node reads the source stream, each
    /// later node reads its predecessor's output, and only the last node has no
    /// output label.
    pub fn is_wired(&self) -> bool {
        let Some((first, rest)) = self.nodes.split_first() else {
            return false;
        };
        if first.input_label.is_some() || first.output_label.is_none() || rest.is_empty() {
            return false;
        }
        let last = self.nodes.len() - 1;
        self.nodes.windows(2).enumerate().all(|(offset, pair)| {
            let index = offset + 1;
            let linked = pair[0].output_label.is_some() && pair[1].input_label == pair[0].output_label;
            let output_ok = (index == last) == pair[1].output_label.is_none();
            linked && output_ok
        })
    }
}

pub struct OperationGraphBuilder<'a> {
    style: &'a OverlayStyle,
}

impl<'a> OperationGraphBuilder<'a> {
    pub fn new(style: &'a OverlayStyle) -> Self {
        Self { style }
    }

    /// Returns `None` when no track has anything visible inside the trim.
    pub fn build(
        &self,
        tracks: &Tracks,
        trim: TrimWindow,
        scale: Option<VideoScale>,
    ) -> Result<Option<OperationGraph>, CompileError> {
        if let Some(scale) = scale {
            scale.validate()?;
        }
        let transformer = CoordinateTransformer::new(scale);

        let shapes = resolve(TrackKind::Shapes, &tracks.shapes, trim)?;
        let captions = resolve(TrackKind::Captions, &tracks.captions, trim)?;
        let details = resolve(TrackKind::DetailCaptions, &tracks.detail_captions, trim)?;
        let arrows = resolve_persistent(TrackKind::Arrows, &tracks.arrows, trim)?;
        let sequence = sequence_numbers(&tracks.captions);

        let mut visual = Vec::new();
        for Resolved { index, window } in shapes {
            if let TimelineEvent::Shape(shape) = &tracks.shapes[index] {
                visual.push(self.shape_operation(shape, window, &transformer));
            }
        }
        for Resolved { index, window } in captions {
            if let TimelineEvent::TextCaption(caption) = &tracks.captions[index] {
                visual.push(self.caption_operation(caption, sequence[index], window));
            }
        }
        for Resolved { index, window } in details {
            if let TimelineEvent::DetailCaption(detail) = &tracks.detail_captions[index] {
                visual.push(self.detail_operation(detail, window, &transformer));
            }
        }
        for Resolved { index, window } in arrows {
            if let TimelineEvent::Arrow(arrow) = &tracks.arrows[index] {
                visual.push(self.arrow_operation(arrow, window, &transformer));
            }
        }

        if visual.is_empty() {
            return Ok(None);
        }

        let mut nodes = Vec::with_capacity(visual.len() + 1);
        nodes.push(self.pad_operation());
        nodes.extend(visual);
        wire(&mut nodes);
        Ok(Some(OperationGraph { nodes }))
    }

    fn pad_operation(&self) -> RenderOperation {
        RenderOperation::new(OperationKind::Pad, None)
            .with("width", ParamValue::Expr("iw".to_owned()))
            .with(
                "height",
                ParamValue::Expr(format!("ih+{}", self.style.caption_strip_height)),
            )
            .with("x", ParamValue::Int(0))
            .with("y", ParamValue::Int(0))
            .with("color", ParamValue::Color(self.style.strip_color.clone()))
    }

    fn shape_operation(
        &self,
        shape: &Shape,
        window: VisibilityWindow,
        transformer: &CoordinateTransformer,
    ) -> RenderOperation {
        let color = ParamValue::Color(shape.color.clone());
        let stroke = transformer
            .transform_length(shape.line_width, Axis::X)
            .max(1);
        match &shape.kind {
            ShapeKind::Rectangle { from, to } => {
                let origin = transformer.transform(Point::new(from.x.min(to.x), from.y.min(to.y)));
                RenderOperation::new(OperationKind::DrawBox, Some(window))
                    .with("x", ParamValue::Int(origin.x))
                    .with("y", ParamValue::Int(origin.y))
                    .with(
                        "w",
                        ParamValue::Int(transformer.transform_length((to.x - from.x).abs(), Axis::X)),
                    )
                    .with(
                        "h",
                        ParamValue::Int(transformer.transform_length((to.y - from.y).abs(), Axis::Y)),
                    )
                    .with("color", color)
                    .with("t", ParamValue::Int(stroke))
            }
            ShapeKind::Line { from, to } => {
                let start = transformer.transform(*from);
                let end = transformer.transform(*to);
                if start.x == end.x || start.y == end.y {
                    straight_line(start, end, stroke, color, window)
                } else {
                    RenderOperation::new(OperationKind::Stamps, Some(window))
                        .with("points", ParamValue::Points(stamp_points(start, end, stroke)))
                        .with("size", ParamValue::Int(stroke))
                        .with("color", color)
                }
            }
            ShapeKind::Arrow { from, to, label } => {
                let direction = if to.x < from.x {
                    Direction::Left
                } else {
                    Direction::Right
                };
                let tip = transformer.transform(*to);
                let operation = RenderOperation::new(OperationKind::Glyph, Some(window))
                    .with("text", ParamValue::Text(direction.glyph().to_owned()))
                    .with(
                        "fontsize",
                        ParamValue::Int(transformer.transform_min(SHAPE_ARROW_FONT_SIZE)),
                    )
                    .with("fontcolor", ParamValue::Color(direction.default_color().to_owned()))
                    .with(
                        "x",
                        ParamValue::Int(tip.x - transformer.transform_length(SHAPE_ARROW_OFFSET_X, Axis::X)),
                    )
                    .with(
                        "y",
                        ParamValue::Int(tip.y - transformer.transform_length(SHAPE_ARROW_OFFSET_Y, Axis::Y)),
                    )
                    .with("font", ParamValue::Text(self.style.default_font.clone()));
                match label {
                    Some(label) => operation.with("label", ParamValue::Text(label.clone())),
                    None => operation,
                }
            }
        }
    }

    fn caption_operation(
        &self,
        caption: &TextCaption,
        sequence: Option<u32>,
        window: VisibilityWindow,
    ) -> RenderOperation {
        let text = match sequence {
            Some(number) => format!("{number}. {}", caption.text),
            None => caption.text.clone(),
        };
        let margin = self.style.caption_margin;
        RenderOperation::new(OperationKind::DrawText, Some(window))
            .with("text", ParamValue::Text(text))
            .with("font", ParamValue::Text(self.font(caption.font.as_deref())))
            .with("fontsize", ParamValue::Int(i64::from(self.style.caption_font_size)))
            .with("fontcolor", ParamValue::Color(caption.text_color.clone()))
            .with("box", ParamValue::Int(1))
            .with("boxcolor", ParamValue::Color(format!("{}@1.0", caption.bg_color)))
            .with("boxborderw", ParamValue::Int(i64::from(self.style.caption_box_border)))
            .with("x", ParamValue::Expr(align_expression(caption.align, margin)))
            .with(
                "y",
                ParamValue::Expr(format!("h-{}-text_h/2", self.style.caption_strip_height / 2)),
            )
    }

    fn detail_operation(
        &self,
        detail: &DetailCaption,
        window: VisibilityWindow,
        transformer: &CoordinateTransformer,
    ) -> RenderOperation {
        let font_size = transformer
            .transform_min(f64::from(self.style.detail_font_size))
            .max(1);
        RenderOperation::new(OperationKind::DrawText, Some(window))
            .with("text", ParamValue::Text(detail.text.clone()))
            .with("font", ParamValue::Text(self.font(detail.font.as_deref())))
            .with("fontsize", ParamValue::Int(font_size))
            .with("fontcolor", ParamValue::Color(detail.text_color.clone()))
            .with("box", ParamValue::Int(1))
            .with(
                "boxcolor",
                ParamValue::Color(format!("{}@{}", detail.bg_color, self.style.detail_box_opacity)),
            )
            .with("boxborderw", ParamValue::Int(DETAIL_BOX_BORDER))
            .with(
                "x",
                ParamValue::Expr(align_expression(detail.align, self.style.caption_margin)),
            )
            .with(
                "y",
                ParamValue::Expr(format!(
                    "h-{}-text_h-{}",
                    self.style.caption_strip_height, DETAIL_STRIP_GAP
                )),
            )
    }

    fn arrow_operation(
        &self,
        arrow: &Arrow,
        window: VisibilityWindow,
        transformer: &CoordinateTransformer,
    ) -> RenderOperation {
        let font_size = transformer.transform_min(arrow.size * ARROW_MARKER_UNIT).max(1);
        let center = transformer.transform(arrow.position);
        let color = arrow
            .color
            .clone()
            .unwrap_or_else(|| arrow.direction.default_color().to_owned());
        RenderOperation::new(OperationKind::Glyph, Some(window))
            .with("text", ParamValue::Text(arrow.direction.glyph().to_owned()))
            .with("fontsize", ParamValue::Int(font_size))
            .with("fontcolor", ParamValue::Color(color))
            .with("x", ParamValue::Int(center.x - font_size / 2))
            .with("y", ParamValue::Int(center.y - font_size / 2))
            .with("font", ParamValue::Text(self.style.default_font.clone()))
    }

    fn font(&self, requested: Option<&str>) -> String {
        requested
            .filter(|font| !font.trim().is_empty())
            .unwrap_or(&self.style.default_font)
            .to_owned()
    }
}

fn straight_line(
    start: PixelPoint,
    end: PixelPoint,
    stroke: i64,
    color: ParamValue,
    window: VisibilityWindow,
) -> RenderOperation {
    let half = stroke / 2;
    let (x, y, w, h) = if start.y == end.y {
        (
            start.x.min(end.x),
            start.y - half,
            (end.x - start.x).abs().max(1),
            stroke,
        )
    } else {
        (
            start.x - half,
            start.y.min(end.y),
            stroke,
            (end.y - start.y).abs().max(1),
        )
    };
    RenderOperation::new(OperationKind::DrawBox, Some(window))
        .with("x", ParamValue::Int(x))
        .with("y", ParamValue::Int(y))
        .with("w", ParamValue::Int(w))
        .with("h", ParamValue::Int(h))
        .with("color", color)
        .with("t", ParamValue::Expr("fill".to_owned()))
}

/// Top-left corners of `size`-pixel squares spaced `size` pixels apart from
/// `start` to `end`, both endpoints included. Very long lines are capped at
/// [`MAX_STAMPS`] gaps, spreading the squares further apart.
pub fn stamp_points(start: PixelPoint, end: PixelPoint, size: i64) -> Vec<PixelPoint> {
    let size = size.max(1);
    let dx = end.x as f64 - start.x as f64;
    let dy = end.y as f64 - start.y as f64;
    let length = dx.hypot(dy);
    let steps = ((length / size as f64).ceil() as usize).clamp(1, MAX_STAMPS);
    let half = size / 2;
    (0..=steps)
        .map(|step| {
            let ratio = step as f64 / steps as f64;
            PixelPoint {
                x: ((start.x as f64 + dx * ratio).round() as i64).saturating_sub(half),
                y: ((start.y as f64 + dy * ratio).round() as i64).saturating_sub(half),
            }
        })
        .collect()
}

/// Sequence numbers for captions that request one, indexed like the track.
///
/// Captions sharing the same text are numbered together in time order starting
/// at 1, so a repeated step label reads "1. Cut", "2. Cut" and so on.
pub fn sequence_numbers(captions: &[TimelineEvent]) -> Vec<Option<u32>> {
    let mut counters: HashMap<&str, u32> = HashMap::new();
    captions
        .iter()
        .map(|event| match event {
            TimelineEvent::TextCaption(caption) if caption.use_sequence_number => {
                let counter = counters.entry(caption.text.as_str()).or_insert(0);
                *counter += 1;
                Some(*counter)
            }
            _ => None,
        })
        .collect()
}

fn align_expression(align: TextAlign, margin: u32) -> String {
    match align {
        TextAlign::Left => margin.to_string(),
        TextAlign::Center => "(w-text_w)/2".to_owned(),
        TextAlign::Right => format!("w-text_w-{margin}"),
    }
}

fn wire(nodes: &mut [RenderOperation]) {
    let last = nodes.len().saturating_sub(1);
    let mut previous: Option<Label> = None;
    for (index, node) in nodes.iter_mut().enumerate() {
        node.input_label = previous.take();
        if index < last {
            let label = if index == 0 {
                Label("padded".to_owned())
            } else {
                Label(format!("filter{index}"))
            };
            node.output_label = Some(label.clone());
            previous = Some(label);
        } else {
            node.output_label = None;
        }
    }
}
