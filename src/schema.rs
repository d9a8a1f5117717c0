use std::path::PathBuf;

use serde::{de::Error as DeError, Deserialize, Deserializer, Serialize};

use crate::error_codes::CompileError;

pub const DEFAULT_TEXT_COLOR: &str = "#000000";
pub const DEFAULT_BG_COLOR: &str = "#FFFFFF";
pub const DEFAULT_SHAPE_COLOR: &str = "#FF0000";
/// Stroke width used by projects saved before `lineWidth` existed.
pub const DEFAULT_LINE_WIDTH: f64 = 3.0;
pub const DEFAULT_ARROW_SIZE: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextAlign {
    Left,
    #[default]
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Left,
    Right,
}

impl Direction {
    pub fn glyph(self) -> &'static str {
        match self {
            Self::Left => "←",
            Self::Right => "→",
        }
    }

    pub fn default_color(self) -> &'static str {
        match self {
            Self::Left => "#1976D2",
            Self::Right => "#FF9800",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextCaption {
    pub time: f64,
    pub text: String,
    pub text_color: String,
    pub bg_color: String,
    pub font: Option<String>,
    pub align: TextAlign,
    pub use_sequence_number: bool,
    pub continuation: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetailCaption {
    pub time: f64,
    pub text: String,
    pub text_color: String,
    pub bg_color: String,
    pub font: Option<String>,
    pub align: TextAlign,
    pub continuation: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShapeKind {
    Rectangle { from: Point, to: Point },
    Line { from: Point, to: Point },
    Arrow {
        from: Point,
        to: Point,
        label: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    pub time: f64,
    pub kind: ShapeKind,
    pub color: String,
    pub line_width: f64,
    pub continuation: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Arrow {
    pub time: f64,
    pub direction: Direction,
    pub position: Point,
    pub size: f64,
    pub color: Option<String>,
}

/// One entry on an annotation track.
#[derive(Debug, Clone, PartialEq)]
pub enum TimelineEvent {
    TextCaption(TextCaption),
    Shape(Shape),
    DetailCaption(DetailCaption),
    Arrow(Arrow),
    /// Terminates everything before it on its track.
    EndMarker { time: f64 },
}

impl TimelineEvent {
    pub fn time(&self) -> f64 {
        match self {
            Self::TextCaption(caption) => caption.time,
            Self::Shape(shape) => shape.time,
            Self::DetailCaption(detail) => detail.time,
            Self::Arrow(arrow) => arrow.time,
            Self::EndMarker { time } => *time,
        }
    }

    /// `None` means the entry predates the continuation flag.
    pub fn continuation(&self) -> Option<bool> {
        match self {
            Self::TextCaption(caption) => caption.continuation,
            Self::Shape(shape) => shape.continuation,
            Self::DetailCaption(detail) => detail.continuation,
            Self::Arrow(_) | Self::EndMarker { .. } => None,
        }
    }

    pub fn is_end_marker(&self) -> bool {
        matches!(self, Self::EndMarker { .. })
    }
}

/// The four independent annotation tracks of a request.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tracks {
    #[serde(default, alias = "annotations", deserialize_with = "caption_track")]
    pub captions: Vec<TimelineEvent>,
    #[serde(default, deserialize_with = "shape_track")]
    pub shapes: Vec<TimelineEvent>,
    #[serde(default, alias = "detailTexts", deserialize_with = "detail_track")]
    pub detail_captions: Vec<TimelineEvent>,
    #[serde(default, deserialize_with = "arrow_track")]
    pub arrows: Vec<TimelineEvent>,
}

impl Tracks {
    pub fn is_empty(&self) -> bool {
        self.captions.is_empty()
            && self.shapes.is_empty()
            && self.detail_captions.is_empty()
            && self.arrows.is_empty()
    }

    /// Stable-sorts every track by time. Entries sharing a timestamp keep their order.
    pub fn sort_by_time(&mut self) {
        for track in [
            &mut self.captions,
            &mut self.shapes,
            &mut self.detail_captions,
            &mut self.arrows,
        ] {
            track.sort_by(|a, b| a.time().total_cmp(&b.time()));
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoScale {
    pub actual_width: u32,
    pub actual_height: u32,
    pub display_width: u32,
    pub display_height: u32,
}

impl VideoScale {
    pub fn validate(&self) -> Result<(), CompileError> {
        if self.actual_width == 0
            || self.actual_height == 0
            || self.display_width == 0
            || self.display_height == 0
        {
            return Err(CompileError::InvalidScale(format!(
                "{}x{} displayed at {}x{}: all dimensions must be positive",
                self.actual_width, self.actual_height, self.display_width, self.display_height
            )));
        }
        Ok(())
    }

    pub fn scale_x(&self) -> f64 {
        f64::from(self.actual_width) / f64::from(self.display_width)
    }

    pub fn scale_y(&self) -> f64 {
        f64::from(self.actual_height) / f64::from(self.display_height)
    }
}

/// A render request as produced by the editing layer.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderRequest {
    #[serde(default)]
    pub input: Option<PathBuf>,
    #[serde(alias = "startTime")]
    pub trim_start: f64,
    #[serde(alias = "duration")]
    pub trim_duration: f64,
    #[serde(default = "default_true")]
    pub include_audio: bool,
    #[serde(default = "default_true", alias = "includeAnnotations")]
    pub include_overlays: bool,
    #[serde(flatten)]
    pub tracks: Tracks,
    #[serde(default)]
    pub video_scale: Option<VideoScale>,
    #[serde(default = "default_speed")]
    pub speed: f64,
}

impl RenderRequest {
    pub fn new(trim_start: f64, trim_duration: f64) -> Self {
        Self {
            input: None,
            trim_start,
            trim_duration,
            include_audio: true,
            include_overlays: true,
            tracks: Tracks::default(),
            video_scale: None,
            speed: 1.0,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_speed() -> f64 {
    1.0
}

fn default_text_color() -> String {
    DEFAULT_TEXT_COLOR.to_owned()
}

fn default_bg_color() -> String {
    DEFAULT_BG_COLOR.to_owned()
}

fn is_blank(text: &str) -> bool {
    text.trim().is_empty()
}

// Wire forms. Field names follow the editing UI's camelCase JSON.

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CaptionEntry {
    time: f64,
    #[serde(default)]
    text: String,
    #[serde(default = "default_text_color")]
    text_color: String,
    #[serde(default = "default_bg_color")]
    bg_color: String,
    #[serde(default)]
    font: Option<String>,
    #[serde(default)]
    text_align: Option<TextAlign>,
    #[serde(default)]
    use_sequence_number: bool,
    #[serde(default)]
    continuation: Option<bool>,
}

impl CaptionEntry {
    fn into_caption(self) -> TimelineEvent {
        if is_blank(&self.text) {
            return TimelineEvent::EndMarker { time: self.time };
        }
        TimelineEvent::TextCaption(TextCaption {
            time: self.time,
            text: self.text,
            text_color: self.text_color,
            bg_color: self.bg_color,
            font: self.font,
            align: self.text_align.unwrap_or_default(),
            use_sequence_number: self.use_sequence_number,
            continuation: self.continuation,
        })
    }

    fn into_detail(self) -> TimelineEvent {
        if is_blank(&self.text) {
            return TimelineEvent::EndMarker { time: self.time };
        }
        TimelineEvent::DetailCaption(DetailCaption {
            time: self.time,
            text: self.text,
            text_color: self.text_color,
            bg_color: self.bg_color,
            font: self.font,
            align: self.text_align.unwrap_or(TextAlign::Left),
            continuation: self.continuation,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShapeEntry {
    time: f64,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    x1: f64,
    #[serde(default)]
    y1: f64,
    #[serde(default)]
    x2: f64,
    #[serde(default)]
    y2: f64,
    #[serde(default)]
    color: Option<String>,
    #[serde(default)]
    line_width: Option<f64>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    continuation: Option<bool>,
}

impl ShapeEntry {
    fn into_event(self) -> Result<TimelineEvent, String> {
        let from = Point::new(self.x1, self.y1);
        let to = Point::new(self.x2, self.y2);
        let kind = match self.kind.trim() {
            "" => return Ok(TimelineEvent::EndMarker { time: self.time }),
            "rectangle" => ShapeKind::Rectangle { from, to },
            "line" => ShapeKind::Line { from, to },
            "arrow" => ShapeKind::Arrow {
                from,
                to,
                label: self.label.filter(|label| !is_blank(label)),
            },
            other => {
                return Err(format!(
                    "unknown shape type '{other}' (expected rectangle, line, arrow or \"\")"
                ))
            }
        };
        if [self.x1, self.y1, self.x2, self.y2].iter().any(|v| !v.is_finite()) {
            return Err(format!(
                "shape coordinates must be finite, got ({}, {}) -> ({}, {})",
                self.x1, self.y1, self.x2, self.y2
            ));
        }
        let line_width = self.line_width.unwrap_or(DEFAULT_LINE_WIDTH);
        if !line_width.is_finite() || line_width <= 0.0 {
            return Err(format!("shape lineWidth must be > 0, got {line_width}"));
        }
        Ok(TimelineEvent::Shape(Shape {
            time: self.time,
            kind,
            color: self
                .color
                .unwrap_or_else(|| DEFAULT_SHAPE_COLOR.to_owned()),
            line_width,
            continuation: self.continuation,
        }))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArrowEntry {
    time: f64,
    #[serde(rename = "type")]
    direction: Direction,
    x: f64,
    y: f64,
    #[serde(default)]
    size: Option<f64>,
    #[serde(default)]
    color: Option<String>,
}

impl ArrowEntry {
    fn into_event(self) -> Result<TimelineEvent, String> {
        let size = self.size.unwrap_or(DEFAULT_ARROW_SIZE);
        if !size.is_finite() || size <= 0.0 {
            return Err(format!("arrow size must be > 0, got {size}"));
        }
        if !self.x.is_finite() || !self.y.is_finite() {
            return Err(format!(
                "arrow position must be finite, got ({}, {})",
                self.x, self.y
            ));
        }
        Ok(TimelineEvent::Arrow(Arrow {
            time: self.time,
            direction: self.direction,
            position: Point::new(self.x, self.y),
            size,
            color: self.color,
        }))
    }
}

fn caption_track<'de, D>(deserializer: D) -> Result<Vec<TimelineEvent>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Vec::<CaptionEntry>::deserialize(deserializer)?
        .into_iter()
        .map(CaptionEntry::into_caption)
        .collect())
}

fn detail_track<'de, D>(deserializer: D) -> Result<Vec<TimelineEvent>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Vec::<CaptionEntry>::deserialize(deserializer)?
        .into_iter()
        .map(CaptionEntry::into_detail)
        .collect())
}

fn shape_track<'de, D>(deserializer: D) -> Result<Vec<TimelineEvent>, D::Error>
where
    D: Deserializer<'de>,
{
    Vec::<ShapeEntry>::deserialize(deserializer)?
        .into_iter()
        .map(|entry| entry.into_event().map_err(D::Error::custom))
        .collect()
}

fn arrow_track<'de, D>(deserializer: D) -> Result<Vec<TimelineEvent>, D::Error>
where
    D: Deserializer<'de>,
{
    Vec::<ArrowEntry>::deserialize(deserializer)?
        .into_iter()
        .map(|entry| entry.into_event().map_err(D::Error::custom))
        .collect()
}
