use crate::{
    core::{Region, Size},
    event::{EventKind, TeachingEvent},
};

/// Approximate glyph metrics for the virtual whiteboard font.
const TEXT_CHAR_W: f64 = 9.0;
const TEXT_LINE_H: f64 = 28.0;
const EQ_CHAR_W: f64 = 14.0;
const EQ_BASE_H_DISPLAY: f64 = 56.0;
const EQ_BASE_H_INLINE: f64 = 36.0;
const PRIMITIVE_W: f64 = 180.0;
const PRIMITIVE_H: f64 = 120.0;

/// Horizontal padding kept clear inside every region.
pub const REGION_PAD: f64 = 12.0;

/// Estimate the footprint of a visual event inside its target region.
///
/// Caller-declared geometry wins. Estimates are always clamped to the
/// region interior, so by construction no object can be asked to hold more
/// space than its region has; this is what makes eviction guarantee
/// forward progress.
pub fn estimate_footprint(ev: &TeachingEvent, region: Region) -> Size {
    let bounds = region.bounds();
    let max_w = bounds.width() - 2.0 * REGION_PAD;
    let max_h = bounds.height() - 2.0 * REGION_PAD;

    let declared = ev.payload.geometry.as_ref().and_then(|g| {
        match (g.width, g.height) {
            (Some(w), Some(h)) if w > 0.0 && h > 0.0 => Some(Size::new(w, h)),
            _ => None,
        }
    });
    if let Some(s) = declared {
        return Size::new(s.width.min(max_w), s.height.min(max_h));
    }

    let raw = match ev.kind {
        EventKind::WriteEquation => {
            let latex = ev.payload.latex.as_deref().unwrap_or("");
            equation_size(latex, ev.payload.display.unwrap_or(true))
        }
        EventKind::WriteText => {
            let text = ev.payload.text.as_deref().unwrap_or("");
            text_size(text, max_w)
        }
        EventKind::DrawArrow | EventKind::DrawLine | EventKind::DrawBox => {
            Size::new(PRIMITIVE_W, PRIMITIVE_H)
        }
        // Non-placing events have no footprint.
        _ => Size::ZERO,
    };

    Size::new(raw.width.clamp(1.0, max_w), raw.height.clamp(1.0, max_h))
}

fn text_size(text: &str, max_w: f64) -> Size {
    let chars = text.chars().count().max(1) as f64;
    let raw_w = chars * TEXT_CHAR_W;
    let lines = (raw_w / max_w).ceil().max(1.0);
    Size::new(raw_w.min(max_w), lines * TEXT_LINE_H)
}

fn equation_size(latex: &str, display: bool) -> Size {
    let base_h = if display {
        EQ_BASE_H_DISPLAY
    } else {
        EQ_BASE_H_INLINE
    };
    let extra_h = 22.0 * count_command(latex, "\\frac") as f64
        + 8.0 * count_command(latex, "\\sqrt") as f64
        + 16.0
            * (count_command(latex, "\\int")
                + count_command(latex, "\\sum")
                + count_command(latex, "\\prod")) as f64;
    Size::new(
        visible_latex_len(latex) as f64 * EQ_CHAR_W,
        base_h + extra_h,
    )
}

fn count_command(latex: &str, cmd: &str) -> usize {
    latex.matches(cmd).count()
}

/// Rough count of rendered glyphs: a `\command` collapses to one, braces
/// render nothing.
fn visible_latex_len(latex: &str) -> usize {
    let mut n = 0usize;
    let mut chars = latex.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' | '}' => {}
            '\\' => {
                n += 1;
                while chars.peek().is_some_and(|c| c.is_ascii_alphabetic()) {
                    chars.next();
                }
            }
            c if c.is_whitespace() => {}
            _ => n += 1,
        }
    }
    n.max(1)
}

/// Content-complexity summary of a lesson's visual stream.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LessonStats {
    pub text_len: usize,
    pub equation_count: usize,
    pub text_count: usize,
    pub diagram_count: usize,
    pub total_equation_len: usize,
}

impl LessonStats {
    pub fn collect(events: &[TeachingEvent]) -> Self {
        let mut s = Self::default();
        for ev in events {
            match ev.kind {
                EventKind::WriteEquation => {
                    s.equation_count += 1;
                    s.total_equation_len += ev
                        .payload
                        .latex
                        .as_deref()
                        .map(|l| visible_latex_len(l))
                        .unwrap_or(0);
                }
                EventKind::WriteText => {
                    s.text_count += 1;
                    s.text_len += ev.payload.text.as_deref().map(str::len).unwrap_or(0);
                }
                EventKind::DrawArrow | EventKind::DrawLine | EventKind::DrawBox => {
                    s.diagram_count += 1;
                }
                _ => {}
            }
        }
        s
    }

    pub fn score(&self) -> f64 {
        let avg_eq_len = if self.equation_count == 0 {
            0.0
        } else {
            self.total_equation_len as f64 / self.equation_count as f64
        };
        self.text_len as f64 / 80.0
            + self.equation_count as f64 * 6.0
            + self.text_count as f64 * 2.0
            + self.diagram_count as f64 * 4.0
            + avg_eq_len / 3.0
    }
}

/// Map a complexity score to the number of pages a lesson plans for. The
/// budget biases the work region toward page turns instead of group
/// eviction while pages remain.
pub fn page_budget(score: f64) -> u32 {
    match score {
        s if s < 22.0 => 1,
        s if s < 45.0 => 2,
        s if s < 68.0 => 3,
        s if s < 92.0 => 4,
        _ => 5,
    }
}
