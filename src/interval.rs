//! Visibility windows for timeline tracks.
//!
//! Every track is resolved in a single reverse pass: walking from the last event
//! to the first, we keep the nearest terminator seen so far, so each event's end
//! is known the moment we reach it.

use serde::Serialize;

use crate::error_codes::{CompileError, TrackKind};
use crate::schema::TimelineEvent;

/// Shortest window handed to the renderer, in seconds.
pub const MIN_WINDOW_SPAN: f64 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrimWindow {
    start: f64,
    duration: f64,
}

impl TrimWindow {
    pub fn new(start: f64, duration: f64) -> Result<Self, CompileError> {
        let invalid = |reason| CompileError::InvalidTrim {
            start,
            duration,
            reason,
        };
        if !start.is_finite() || start < 0.0 {
            return Err(invalid("start must be a finite value >= 0"));
        }
        if !duration.is_finite() || duration <= 0.0 {
            return Err(invalid("duration must be a finite value > 0"));
        }
        Ok(Self { start, duration })
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    fn relative(&self, time: f64) -> f64 {
        time - self.start
    }
}

/// Half-open `[start, end)` interval relative to the trimmed clip.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VisibilityWindow {
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolved {
    /// Position of the event in its track.
    pub index: usize,
    pub window: VisibilityWindow,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Terminator {
    EndMarker(f64),
    Restart(f64),
}

impl Terminator {
    fn time(self) -> f64 {
        match self {
            Self::EndMarker(time) | Self::Restart(time) => time,
        }
    }
}

/// Resolves windows for captions, shapes and detail captions.
///
/// An event ends at the first later event that is an end marker, declares
/// `continuation = false`, or carries no continuation flag and a different
/// timestamp. Later events with `continuation = true` never end it.
pub fn resolve(
    track: TrackKind,
    events: &[TimelineEvent],
    trim: TrimWindow,
) -> Result<Vec<Resolved>, CompileError> {
    validate_track(track, events)?;

    let mut resolved = Vec::with_capacity(events.len());
    let mut hard: Option<Terminator> = None;
    // Nearest later legacy event, and the nearest one after it with a larger time.
    let mut legacy_next: Option<f64> = None;
    let mut legacy_after: Option<f64> = None;

    for (index, event) in events.iter().enumerate().rev() {
        let time = event.time();
        if !event.is_end_marker() {
            let legacy = match legacy_next {
                Some(next) if next != time => Some(next),
                Some(_) => legacy_after,
                None => None,
            };
            let terminator = match (hard, legacy) {
                (Some(hard), Some(legacy)) if legacy < hard.time() => {
                    Some(Terminator::Restart(legacy))
                }
                (Some(hard), _) => Some(hard),
                (None, Some(legacy)) => Some(Terminator::Restart(legacy)),
                (None, None) => None,
            };
            if let Some(window) = clip_window(time, terminator, trim) {
                resolved.push(Resolved { index, window });
            }
        }

        match event.continuation() {
            _ if event.is_end_marker() => hard = Some(Terminator::EndMarker(time)),
            Some(false) => hard = Some(Terminator::Restart(time)),
            Some(true) => {}
            None => {
                if legacy_next != Some(time) {
                    legacy_after = legacy_next;
                    legacy_next = Some(time);
                }
            }
        }
    }

    resolved.reverse();
    Ok(resolved)
}

/// Resolves windows for arrow markers. Markers stay on screen until the end of
/// the clip; only an end marker cuts them short.
pub fn resolve_persistent(
    track: TrackKind,
    events: &[TimelineEvent],
    trim: TrimWindow,
) -> Result<Vec<Resolved>, CompileError> {
    validate_track(track, events)?;

    let mut resolved = Vec::with_capacity(events.len());
    let mut next_marker = None;
    for (index, event) in events.iter().enumerate().rev() {
        if event.is_end_marker() {
            next_marker = Some(Terminator::EndMarker(event.time()));
            continue;
        }
        if let Some(window) = clip_window(event.time(), next_marker, trim) {
            resolved.push(Resolved { index, window });
        }
    }
    resolved.reverse();
    Ok(resolved)
}

fn clip_window(
    time: f64,
    terminator: Option<Terminator>,
    trim: TrimWindow,
) -> Option<VisibilityWindow> {
    let duration = trim.duration();
    let raw_start = trim.relative(time);
    let raw_end = terminator.map_or(duration, |terminator| trim.relative(terminator.time()));

    // Entirely after the clip, or finished before it starts.
    if raw_start >= duration || raw_end < 0.0 || (raw_end == 0.0 && raw_start < 0.0) {
        return None;
    }

    let start = raw_start.max(0.0);
    let end = start.max(duration.min(raw_end));
    if end > start {
        return Some(VisibilityWindow { start, end });
    }

    match terminator {
        // An end marker at the same instant hides the event outright.
        Some(Terminator::EndMarker(_)) => None,
        _ => Some(VisibilityWindow {
            start,
            end: duration.min(start + MIN_WINDOW_SPAN),
        }),
    }
}

fn validate_track(track: TrackKind, events: &[TimelineEvent]) -> Result<(), CompileError> {
    let mut previous = 0.0_f64;
    for (index, event) in events.iter().enumerate() {
        let time = event.time();
        let reason = if !time.is_finite() {
            Some(format!("time must be finite, got {time}"))
        } else if time < 0.0 {
            Some(format!("time must be >= 0, got {time}"))
        } else if time < previous {
            Some(format!(
                "track is not time-ordered ({time} follows {previous})"
            ))
        } else {
            None
        };
        if let Some(reason) = reason {
            return Err(CompileError::InvalidEvent {
                track,
                index,
                reason,
            });
        }
        previous = time;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Point, Shape, ShapeKind, TextAlign, TextCaption};

    fn caption(time: f64, continuation: Option<bool>) -> TimelineEvent {
        TimelineEvent::TextCaption(TextCaption {
            time,
            text: format!("caption@{time}"),
            text_color: "#000000".to_owned(),
            bg_color: "#FFFFFF".to_owned(),
            font: None,
            align: TextAlign::Center,
            use_sequence_number: false,
            continuation,
        })
    }

    fn rect(time: f64, continuation: Option<bool>) -> TimelineEvent {
        TimelineEvent::Shape(Shape {
            time,
            kind: ShapeKind::Rectangle {
                from: Point::new(0.0, 0.0),
                to: Point::new(10.0, 10.0),
            },
            color: "#FF0000".to_owned(),
            line_width: 3.0,
            continuation,
        })
    }

    fn windows(resolved: &[Resolved]) -> Vec<(usize, f64, f64)> {
        resolved
            .iter()
            .map(|r| (r.index, r.window.start, r.window.end))
            .collect()
    }

    fn trim(start: f64, duration: f64) -> TrimWindow {
        TrimWindow::new(start, duration).expect("valid trim")
    }

    #[test]
    fn legacy_captions_end_at_next_timestamp() {
        let events = vec![caption(1.0, None), caption(4.0, None)];
        let resolved = resolve(TrackKind::Captions, &events, trim(0.0, 6.0)).expect("resolve");
        assert_eq!(windows(&resolved), vec![(0, 1.0, 4.0), (1, 4.0, 6.0)]);
    }

    #[test]
    fn legacy_shapes_sharing_a_timestamp_form_one_batch() {
        let events = vec![rect(1.0, None), rect(1.0, None), rect(3.0, None)];
        let resolved = resolve(TrackKind::Shapes, &events, trim(0.0, 10.0)).expect("resolve");
        assert_eq!(
            windows(&resolved),
            vec![(0, 1.0, 3.0), (1, 1.0, 3.0), (2, 3.0, 10.0)]
        );
    }

    #[test]
    fn continuation_true_keeps_earlier_events_visible() {
        let events = vec![
            rect(1.0, Some(false)),
            rect(2.0, Some(true)),
            rect(3.0, Some(true)),
            rect(5.0, Some(false)),
        ];
        let resolved = resolve(TrackKind::Shapes, &events, trim(0.0, 10.0)).expect("resolve");
        assert_eq!(
            windows(&resolved),
            vec![
                (0, 1.0, 5.0),
                (1, 2.0, 5.0),
                (2, 3.0, 5.0),
                (3, 5.0, 10.0)
            ]
        );
    }

    #[test]
    fn end_marker_terminates_everything_before_it() {
        let events = vec![
            rect(2.0, Some(false)),
            rect(3.0, Some(true)),
            TimelineEvent::EndMarker { time: 5.0 },
            rect(7.0, None),
        ];
        let resolved = resolve(TrackKind::Shapes, &events, trim(0.0, 10.0)).expect("resolve");
        assert_eq!(
            windows(&resolved),
            vec![(0, 2.0, 5.0), (1, 3.0, 5.0), (3, 7.0, 10.0)]
        );
    }

    #[test]
    fn events_are_translated_and_clamped_to_the_trim() {
        let events = vec![
            caption(1.0, None),
            caption(3.0, None),
            caption(6.0, None),
            caption(20.0, None),
        ];
        let resolved = resolve(TrackKind::Captions, &events, trim(2.0, 5.0)).expect("resolve");
        // The first caption ends at 3.0 absolute = 1.0 relative, so it is visible from 0.
        assert_eq!(
            windows(&resolved),
            vec![(0, 0.0, 1.0), (1, 1.0, 4.0), (2, 4.0, 5.0)]
        );
    }

    #[test]
    fn events_finished_before_the_trim_are_dropped() {
        let events = vec![caption(1.0, None), caption(2.0, None), caption(8.0, None)];
        let resolved = resolve(TrackKind::Captions, &events, trim(4.0, 10.0)).expect("resolve");
        assert_eq!(windows(&resolved), vec![(1, 0.0, 4.0), (2, 4.0, 10.0)]);
    }

    #[test]
    fn restart_at_same_instant_yields_minimal_window() {
        let events = vec![rect(2.0, Some(false)), rect(2.0, Some(false))];
        let resolved = resolve(TrackKind::Shapes, &events, trim(0.0, 10.0)).expect("resolve");
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].window.start, 2.0);
        assert!((resolved[0].window.end - (2.0 + MIN_WINDOW_SPAN)).abs() < 1e-12);
    }

    #[test]
    fn restart_at_trim_start_still_gets_a_minimal_window() {
        let events = vec![caption(3.0, Some(true)), caption(3.0, Some(false))];
        let resolved = resolve(TrackKind::Captions, &events, trim(3.0, 5.0)).expect("resolve");
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].index, 0);
        assert_eq!(resolved[0].window.start, 0.0);
        assert!((resolved[0].window.end - MIN_WINDOW_SPAN).abs() < 1e-12);
        assert_eq!(resolved[1].window.start, 0.0);

        let events = vec![caption(3.0, None), TimelineEvent::EndMarker { time: 3.0 }];
        let resolved = resolve(TrackKind::Captions, &events, trim(3.0, 5.0)).expect("resolve");
        assert!(resolved.is_empty());
    }

    #[test]
    fn end_marker_at_same_instant_hides_the_event() {
        let events = vec![caption(2.0, None), TimelineEvent::EndMarker { time: 2.0 }];
        let resolved = resolve(TrackKind::Captions, &events, trim(0.0, 10.0)).expect("resolve");
        assert!(resolved.is_empty());
    }

    #[test]
    fn negative_and_unsorted_times_are_rejected() {
        let error = resolve(TrackKind::Captions, &[caption(-1.0, None)], trim(0.0, 5.0))
            .expect_err("negative time");
        assert!(matches!(error, CompileError::InvalidEvent { index: 0, .. }));

        let error = resolve(
            TrackKind::Shapes,
            &[rect(3.0, None), rect(f64::NAN, None)],
            trim(0.0, 5.0),
        )
        .expect_err("nan time");
        assert!(matches!(error, CompileError::InvalidEvent { index: 1, .. }));

        let error = resolve(
            TrackKind::Shapes,
            &[rect(3.0, None), rect(1.0, None)],
            trim(0.0, 5.0),
        )
        .expect_err("unsorted");
        assert_eq!(error.code(), crate::error_codes::INVALID_EVENT);
    }

    #[test]
    fn empty_track_resolves_to_nothing() {
        let resolved = resolve(TrackKind::Arrows, &[], trim(0.0, 5.0)).expect("resolve");
        assert!(resolved.is_empty());
    }

    #[test]
    fn persistent_windows_ignore_later_visual_events() {
        let events = vec![
            caption(1.0, None),
            caption(2.0, Some(false)),
            TimelineEvent::EndMarker { time: 4.0 },
            caption(6.0, None),
        ];
        let resolved =
            resolve_persistent(TrackKind::Arrows, &events, trim(0.0, 8.0)).expect("resolve");
        assert_eq!(
            windows(&resolved),
            vec![(0, 1.0, 4.0), (1, 2.0, 4.0), (3, 6.0, 8.0)]
        );
    }

    #[test]
    fn trim_window_rejects_non_positive_duration() {
        assert!(TrimWindow::new(0.0, 0.0).is_err());
        assert!(TrimWindow::new(-1.0, 3.0).is_err());
        assert!(TrimWindow::new(1.0, f64::INFINITY).is_err());
    }
}
