use std::collections::HashMap;

use crate::{
    core::{PageIndex, Rect, Region, Size},
    event::{AnnotationStyle, EventId, EventKind, Intent, TeachingEvent},
    measure::{self, REGION_PAD},
};

/// Vertical gap left under every placed object.
const ITEM_GAP: f64 = 16.0;
/// Tighter gap used inside an equation chain so successive transformations
/// read as one derivation.
const CHAIN_GAP: f64 = 8.0;
/// Residual gap after vertical compression of the work region.
const COMPRESS_GAP: f64 = 4.0;
/// Indent applied to `=`-equations in the work region so derivation chains
/// align visually.
const EQUATION_INDENT: f64 = 48.0;

/// A teaching event after spatial placement. Owned by the layout engine;
/// eviction destroys the object but never the event it came from.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BoardObject {
    pub id: EventId,
    pub kind: EventKind,
    pub region: Region,
    pub page: PageIndex,
    pub rect: Rect,
    /// Creation order, monotonic across the whole board.
    pub order: u64,
    pub chain: Option<String>,
    pub content: Option<String>,
    pub display: Option<bool>,
    /// Set when placing this object advanced its region to a new page.
    pub page_turn: bool,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BoardAnnotation {
    pub target: EventId,
    pub style: AnnotationStyle,
}

#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RegionStatus {
    pub region: Region,
    pub page: PageIndex,
    /// Next free y offset.
    pub cursor: f64,
    pub used: bool,
}

/// Read-only view of the board restricted to one page.
#[derive(Clone, Debug, serde::Serialize)]
pub struct BoardSnapshot {
    pub page: PageIndex,
    pub page_count: u32,
    pub objects: Vec<BoardObject>,
    pub annotations: Vec<BoardAnnotation>,
    pub regions: [RegionStatus; 4],
}

#[derive(Clone, Copy, Debug)]
struct ChainCursor {
    region: Region,
    page: PageIndex,
    y: f64,
}

/// Places visual events into the four-region, multi-page board.
///
/// Objects live in an arena (`Vec<Option<_>>`) with a side id map for O(1)
/// lookup; eviction clears the slot and the map entry. The whole structure
/// is cheap to rebuild deterministically from an event list, which is how
/// seek and interrupt reconstruct board state without coordination.
#[derive(Debug)]
pub struct BoardLayout {
    arena: Vec<Option<BoardObject>>,
    index: HashMap<EventId, usize>,
    annotations: Vec<BoardAnnotation>,
    region_page: HashMap<Region, PageIndex>,
    cursors: HashMap<(Region, PageIndex), f64>,
    chains: HashMap<String, ChainCursor>,
    order: u64,
    page_budget: u32,
    active_page: PageIndex,
    max_page: PageIndex,
}

impl BoardLayout {
    pub fn new(page_budget: u32) -> Self {
        Self {
            arena: Vec::new(),
            index: HashMap::new(),
            annotations: Vec::new(),
            region_page: HashMap::new(),
            cursors: HashMap::new(),
            chains: HashMap::new(),
            order: 0,
            page_budget: page_budget.max(1),
            active_page: PageIndex(0),
            max_page: PageIndex(0),
        }
    }

    /// Build a board from an ordered visual-event list. The page budget is
    /// derived from the lesson's complexity score. Events carrying an
    /// explicit order hint are re-sorted by it (stable, original position
    /// standing in for a missing hint).
    #[tracing::instrument(skip(events), fields(events = events.len()))]
    pub fn build(events: &[TeachingEvent]) -> Self {
        let stats = measure::LessonStats::collect(events);
        let budget = measure::page_budget(stats.score());
        let mut layout = Self::new(budget);

        let mut ordered: Vec<(usize, &TeachingEvent)> = events.iter().enumerate().collect();
        ordered.sort_by_key(|(i, ev)| ev.payload.order.unwrap_or(*i as i32));
        for (_, ev) in ordered {
            layout.apply(ev);
        }
        layout
    }

    pub fn page_budget(&self) -> u32 {
        self.page_budget
    }

    pub fn active_page(&self) -> PageIndex {
        self.active_page
    }

    pub fn page_count(&self) -> u32 {
        self.max_page.0 + 1
    }

    /// Apply one visual event. Non-visual events are ignored, so callers
    /// can feed the raw stream.
    pub fn apply(&mut self, ev: &TeachingEvent) {
        match ev.kind {
            k if k.places_object() => self.place(ev),
            EventKind::Annotate => self.annotate(ev),
            EventKind::ClearRegion => self.apply_clear(ev),
            _ => {}
        }
    }

    pub fn object(&self, id: &EventId) -> Option<&BoardObject> {
        self.index
            .get(id)
            .and_then(|&slot| self.arena.get(slot))
            .and_then(|o| o.as_ref())
    }

    pub fn objects(&self) -> impl Iterator<Item = &BoardObject> {
        self.arena.iter().filter_map(|o| o.as_ref())
    }

    pub fn snapshot(&self, page: PageIndex) -> BoardSnapshot {
        let objects: Vec<BoardObject> = self
            .objects()
            .filter(|o| o.page == page)
            .cloned()
            .collect();
        let annotations = self
            .annotations
            .iter()
            .filter(|a| objects.iter().any(|o| o.id == a.target))
            .cloned()
            .collect();
        let regions = Region::ALL.map(|region| RegionStatus {
            region,
            page,
            cursor: self.cursor(region, page),
            used: self.objects().any(|o| o.region == region && o.page == page),
        });
        BoardSnapshot {
            page,
            page_count: self.page_count(),
            objects,
            annotations,
            regions,
        }
    }

    /// Clear a region on one page, a region on every page, then recompute
    /// the affected cursors from what remains.
    pub fn clear_region(&mut self, region: Region, page: Option<PageIndex>) {
        for slot in 0..self.arena.len() {
            let matches = self.arena[slot]
                .as_ref()
                .is_some_and(|o| o.region == region && page.is_none_or(|p| o.page == p));
            if matches {
                self.evict_slot(slot, "clear");
            }
        }
        self.recompute_cursor(region, page);
    }

    /// Remove one object by id, then recompute its region cursor.
    pub fn clear_object(&mut self, id: &EventId) {
        let Some(&slot) = self.index.get(id) else {
            return;
        };
        let Some((region, page)) = self.arena[slot].as_ref().map(|o| (o.region, o.page)) else {
            return;
        };
        self.evict_slot(slot, "clear");
        self.recompute_cursor(region, Some(page));
    }

    fn apply_clear(&mut self, ev: &TeachingEvent) {
        if let Some(target) = &ev.payload.target_id {
            self.clear_object(target);
            return;
        }
        match ev.payload.region {
            Some(region) => self.clear_region(region, None),
            None => {
                for region in Region::ALL {
                    self.clear_region(region, None);
                }
            }
        }
    }

    fn annotate(&mut self, ev: &TeachingEvent) {
        let Some(style) = ev.payload.annotation else {
            return;
        };
        let Some(target) = ev.payload.target_id.clone() else {
            return;
        };
        // Annotations only exist while their target does.
        if self.index.contains_key(&target) {
            self.annotations.push(BoardAnnotation { target, style });
        }
    }

    fn place(&mut self, ev: &TeachingEvent) {
        let region = resolve_region(ev);
        let chain = ev.payload.chain_id.clone();
        let chain_cursor = chain
            .as_deref()
            .and_then(|c| self.chains.get(c))
            .copied()
            .filter(|c| c.region == region);

        let mut page = chain_cursor
            .map(|c| c.page)
            .unwrap_or_else(|| self.current_page(region));
        let size = measure::estimate_footprint(ev, region);

        let explicit_y = ev.payload.geometry.as_ref().and_then(|g| g.y);
        let mut page_turn = false;

        if explicit_y.is_none() && chain_cursor.is_none() {
            page_turn = self.ensure_space(region, &mut page, size.height + ITEM_GAP);
        }

        let bounds = region.bounds();
        let x = self.resolve_x(ev, region, size);

        let mut y = if let Some(y) = explicit_y {
            y.clamp(bounds.y0, (bounds.y1 - size.height).max(bounds.y0))
        } else {
            let base = chain_cursor
                .map(|c| c.y)
                .unwrap_or_else(|| self.cursor(region, page));
            self.slide_past_collisions(region, page, x, base, size)
        };

        // Still over the vertical bound after eviction: advance this region
        // to a fresh page before placing.
        if y + size.height > bounds.y1 {
            page = self.turn_page(region, page);
            page_turn = true;
            y = self.cursor(region, page);
            y = self.slide_past_collisions(region, page, x, y, size);
        }

        let rect = Rect::new(x, y, x + size.width, y + size.height);
        self.order += 1;
        let object = BoardObject {
            id: ev.id.clone(),
            kind: ev.kind,
            region,
            page,
            rect,
            order: self.order,
            chain: chain.clone(),
            content: ev.payload.content().map(str::to_string),
            display: ev.payload.display,
            page_turn,
        };

        if page_turn {
            tracing::debug!(id = %object.id, region = region.as_str(), page = page.0, "page turn");
        }

        let slot = self.arena.len();
        self.index.insert(object.id.clone(), slot);
        self.arena.push(Some(object));

        let bottom = y + size.height;
        let cursor = self.cursors.entry((region, page)).or_insert(bounds.y0 + REGION_PAD);
        *cursor = cursor.max(bottom + ITEM_GAP);
        if let Some(chain) = chain {
            self.chains.insert(
                chain,
                ChainCursor {
                    region,
                    page,
                    y: bottom + CHAIN_GAP,
                },
            );
        }

        self.region_page.insert(region, page);
        self.active_page = page;
        self.max_page = self.max_page.max(page);
    }

    fn resolve_x(&self, ev: &TeachingEvent, region: Region, size: Size) -> f64 {
        let bounds = region.bounds();
        let max_x = (bounds.x1 - size.width).max(bounds.x0);
        if let Some(x) = ev.payload.geometry.as_ref().and_then(|g| g.x) {
            return x.clamp(bounds.x0, max_x);
        }
        let mut x = bounds.x0 + REGION_PAD;
        let is_derivation_step = ev.kind == EventKind::WriteEquation
            && region == Region::Work
            && ev.payload.content().is_some_and(|c| c.contains('='));
        if is_derivation_step {
            x += EQUATION_INDENT;
        }
        x.clamp(bounds.x0, max_x)
    }

    /// Slide y downward past any rectangle overlap with existing objects in
    /// the same region and page. Only used for implicit placement; explicit
    /// geometry is a documented collision override.
    fn slide_past_collisions(
        &self,
        region: Region,
        page: PageIndex,
        x: f64,
        mut y: f64,
        size: Size,
    ) -> f64 {
        let bounds = region.bounds();
        y = y.max(bounds.y0 + REGION_PAD);
        loop {
            let candidate = Rect::new(x, y, x + size.width, y + size.height);
            let hit = self
                .objects()
                .filter(|o| o.region == region && o.page == page)
                .find(|o| overlaps(o.rect, candidate));
            match hit {
                Some(o) => y = o.rect.y1 + ITEM_GAP,
                None => return y,
            }
        }
    }

    /// Free enough vertical room in `region` for `needed` pixels, following
    /// the eviction ladder: oldest scratch first, then (work only) vertical
    /// compression and oldest-group eviction, then (given/final) repeated
    /// single-oldest eviction. Returns true when the ladder gave up and the
    /// region advanced to a new page instead.
    fn ensure_space(&mut self, region: Region, page: &mut PageIndex, needed: f64) -> bool {
        if self.free_height(region, *page) >= needed {
            return false;
        }

        // (a) scratch content is sacrificial, on every path.
        self.evict_oldest(Region::Scratch, *page);
        if region == Region::Scratch {
            while self.free_height(region, *page) < needed
                && self.evict_oldest(Region::Scratch, *page)
            {}
        }
        if self.free_height(region, *page) >= needed {
            return false;
        }

        match region {
            Region::Work => {
                self.compress(Region::Work, *page);
                if self.free_height(region, *page) >= needed {
                    return false;
                }
                // While the lesson still has planned pages, a page turn
                // keeps more derivation on screen than tearing out groups.
                if page.0 + 1 < self.page_budget {
                    *page = self.turn_page(region, *page);
                    return true;
                }
                while self.free_height(region, *page) < needed
                    && self.evict_oldest_group(Region::Work, *page)
                {}
            }
            Region::Given | Region::Final => {
                while self.free_height(region, *page) < needed
                    && self.evict_oldest(region, *page)
                {}
            }
            Region::Scratch => {}
        }

        if self.free_height(region, *page) >= needed {
            return false;
        }
        *page = self.turn_page(region, *page);
        true
    }

    fn free_height(&self, region: Region, page: PageIndex) -> f64 {
        region.bounds().y1 - REGION_PAD - self.cursor(region, page)
    }

    fn cursor(&self, region: Region, page: PageIndex) -> f64 {
        self.cursors
            .get(&(region, page))
            .copied()
            .unwrap_or(region.bounds().y0 + REGION_PAD)
    }

    fn current_page(&self, region: Region) -> PageIndex {
        self.region_page.get(&region).copied().unwrap_or_default()
    }

    fn turn_page(&mut self, region: Region, page: PageIndex) -> PageIndex {
        let next = page.next();
        self.region_page.insert(region, next);
        self.max_page = self.max_page.max(next);
        next
    }

    /// Evict the single oldest visible object in a region+page and restack
    /// the survivors so the freed space is actually reusable. Returns false
    /// when the region is already empty there.
    fn evict_oldest(&mut self, region: Region, page: PageIndex) -> bool {
        let oldest = self
            .objects()
            .filter(|o| o.region == region && o.page == page)
            .min_by_key(|o| o.order)
            .map(|o| self.index[&o.id]);
        match oldest {
            Some(slot) => {
                self.evict_slot(slot, "pressure");
                self.restack(region, page, ITEM_GAP);
                true
            }
            None => false,
        }
    }

    /// Evict the oldest object together with its whole chain, so a
    /// derivation never loses just its middle.
    fn evict_oldest_group(&mut self, region: Region, page: PageIndex) -> bool {
        let oldest = self
            .objects()
            .filter(|o| o.region == region && o.page == page)
            .min_by_key(|o| o.order);
        let Some(oldest) = oldest else {
            return false;
        };
        let chain = oldest.chain.clone();
        let slots: Vec<usize> = match &chain {
            Some(chain) => self
                .objects()
                .filter(|o| o.region == region && o.page == page && o.chain.as_ref() == Some(chain))
                .map(|o| self.index[&o.id])
                .collect(),
            None => vec![self.index[&oldest.id]],
        };
        for slot in slots {
            self.evict_slot(slot, "pressure");
        }
        if let Some(chain) = chain {
            self.chains.remove(&chain);
        }
        self.restack(region, page, ITEM_GAP);
        true
    }

    fn evict_slot(&mut self, slot: usize, why: &'static str) {
        let Some(object) = self.arena[slot].take() else {
            return;
        };
        tracing::debug!(
            id = %object.id,
            region = object.region.as_str(),
            page = object.page.0,
            why,
            "evicting board object"
        );
        self.index.remove(&object.id);
        self.annotations.retain(|a| a.target != object.id);
    }

    /// Vertical compression of a region under pressure: gaps collapse to a
    /// hairline so the derivation keeps as much history as possible.
    fn compress(&mut self, region: Region, page: PageIndex) {
        self.restack(region, page, COMPRESS_GAP);
    }

    /// Restack a region's objects top-down with the given gap, keeping
    /// relative vertical order, then fix the cursor and any chain cursors
    /// pointing into this region+page.
    fn restack(&mut self, region: Region, page: PageIndex, gap: f64) {
        let mut slots: Vec<usize> = self
            .objects()
            .filter(|o| o.region == region && o.page == page)
            .map(|o| self.index[&o.id])
            .collect();
        slots.sort_by(|a, b| {
            let ya = self.arena[*a].as_ref().map(|o| o.rect.y0).unwrap_or(0.0);
            let yb = self.arena[*b].as_ref().map(|o| o.rect.y0).unwrap_or(0.0);
            ya.total_cmp(&yb)
        });

        let mut y = region.bounds().y0 + REGION_PAD;
        for slot in slots {
            if let Some(o) = self.arena[slot].as_mut() {
                let h = o.rect.height();
                let w = o.rect.width();
                let x = o.rect.x0;
                o.rect = Rect::new(x, y, x + w, y + h);
                y += h + gap;
            }
        }
        self.cursors.insert((region, page), y);
        self.refresh_chain_cursors(region, page);
    }

    /// Re-derive chain cursors from each chain's newest surviving member;
    /// chains wiped from this region+page lose their cursor.
    fn refresh_chain_cursors(&mut self, region: Region, page: PageIndex) {
        let stale: Vec<String> = self
            .chains
            .iter()
            .filter(|(_, c)| c.region == region && c.page == page)
            .map(|(k, _)| k.clone())
            .collect();
        for chain in stale {
            let newest = self
                .objects()
                .filter(|o| {
                    o.region == region && o.page == page && o.chain.as_deref() == Some(&chain)
                })
                .max_by_key(|o| o.order)
                .map(|o| o.rect.y1);
            match newest {
                Some(bottom) => {
                    self.chains.insert(
                        chain,
                        ChainCursor {
                            region,
                            page,
                            y: bottom + CHAIN_GAP,
                        },
                    );
                }
                None => {
                    self.chains.remove(&chain);
                }
            }
        }
    }

    fn recompute_cursor(&mut self, region: Region, page: Option<PageIndex>) {
        let pages: Vec<PageIndex> = match page {
            Some(p) => vec![p],
            None => (0..=self.max_page.0).map(PageIndex).collect(),
        };
        for p in pages {
            let bottom = self
                .objects()
                .filter(|o| o.region == region && o.page == p)
                .map(|o| o.rect.y1 + ITEM_GAP)
                .fold(region.bounds().y0 + REGION_PAD, f64::max);
            self.cursors.insert((region, p), bottom);
        }
    }
}

fn overlaps(a: Rect, b: Rect) -> bool {
    !a.intersect(b).is_zero_area()
}

fn resolve_region(ev: &TeachingEvent) -> Region {
    if let Some(region) = ev.payload.region {
        return region;
    }
    match ev.payload.intent {
        Some(Intent::Introduce) => Region::Given,
        Some(Intent::Result) => Region::Final,
        Some(Intent::SideNote) => Region::Scratch,
        Some(Intent::Derive) | Some(Intent::Emphasize) => Region::Work,
        None if ev.kind.is_drawing() => Region::Scratch,
        None => Region::Work,
    }
}
