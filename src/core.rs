pub use kurbo::{Point, Rect, Size};

/// A duration or timestamp in milliseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd, serde::Serialize, serde::Deserialize)]
pub struct Millis(pub f64);

impl Millis {
    pub const ZERO: Millis = Millis(0.0);

    pub fn max(self, other: Millis) -> Millis {
        Millis(self.0.max(other.0))
    }

    pub fn min(self, other: Millis) -> Millis {
        Millis(self.0.min(other.0))
    }

    pub fn clamp(self, lo: Millis, hi: Millis) -> Millis {
        Millis(self.0.clamp(lo.0, hi.0))
    }

    pub fn is_zero(self) -> bool {
        self.0 <= 0.0
    }
}

impl std::ops::Add for Millis {
    type Output = Millis;
    fn add(self, rhs: Millis) -> Millis {
        Millis(self.0 + rhs.0)
    }
}

impl std::ops::AddAssign for Millis {
    fn add_assign(&mut self, rhs: Millis) {
        self.0 += rhs.0;
    }
}

impl std::ops::Sub for Millis {
    type Output = Millis;
    fn sub(self, rhs: Millis) -> Millis {
        Millis(self.0 - rhs.0)
    }
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize,
    serde::Deserialize,
)]
pub struct PageIndex(pub u32);

impl PageIndex {
    pub fn next(self) -> PageIndex {
        PageIndex(self.0 + 1)
    }
}

/// Virtual canvas dimensions. Every page is one instance of this canvas.
pub const CANVAS_WIDTH: f64 = 1600.0;
pub const CANVAS_HEIGHT: f64 = 1000.0;

/// One of the four named board areas. Bounds are fixed per page.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    /// Problem statement and initial facts.
    Given,
    /// The main derivation area.
    Work,
    /// Side notes and diagram space; evicted first under pressure.
    Scratch,
    /// Boxed results.
    Final,
}

impl Region {
    pub const ALL: [Region; 4] = [Region::Given, Region::Work, Region::Scratch, Region::Final];

    pub fn bounds(self) -> Rect {
        match self {
            Region::Given => Rect::new(40.0, 40.0, 1560.0, 200.0),
            Region::Work => Rect::new(40.0, 230.0, 1040.0, 780.0),
            Region::Scratch => Rect::new(1070.0, 230.0, 1560.0, 780.0),
            Region::Final => Rect::new(40.0, 810.0, 1560.0, 960.0),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Region::Given => "given",
            Region::Work => "work",
            Region::Scratch => "scratch",
            Region::Final => "final",
        }
    }

    /// Lenient parse used on wire hints. Unrecognized names resolve to `None`
    /// so a bad hint degrades to the semantic default instead of failing.
    pub fn parse(s: &str) -> Option<Region> {
        match s.trim().to_ascii_lowercase().as_str() {
            "given" | "top" | "statement" => Some(Region::Given),
            "work" | "center" | "main" => Some(Region::Work),
            "scratch" | "side" | "margin" => Some(Region::Scratch),
            "final" | "bottom" | "result" => Some(Region::Final),
            _ => None,
        }
    }
}
