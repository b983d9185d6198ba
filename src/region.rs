//! Rectangle and dirty-region primitives
//!
//! Dirty tracking throughout the crate is expressed as sets of axis-aligned
//! rectangles in screen pixel coordinates. A [`Region`] is deliberately kept
//! as a flat rect list with opportunistic merging rather than a band-based
//! structure: pools hold at most a handful of rects per frame and the
//! painting loop only needs iteration and intersection.

/// An axis-aligned rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rect {
    /// X coordinate (pixels)
    pub x: i32,
    /// Y coordinate (pixels)
    pub y: i32,
    /// Width (pixels)
    pub width: u32,
    /// Height (pixels)
    pub height: u32,
}

impl Rect {
    /// Creates a new rectangle.
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Returns the area in pixels.
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// A rectangle is empty when either dimension is zero.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Checks whether this rectangle shares any pixels with another.
    pub fn intersects(&self, other: &Rect) -> bool {
        !(self.is_empty()
            || other.is_empty()
            || self.x + self.width as i32 <= other.x
            || other.x + other.width as i32 <= self.x
            || self.y + self.height as i32 <= other.y
            || other.y + other.height as i32 <= self.y)
    }

    /// Computes the intersection of two rectangles.
    ///
    /// Returns `None` if they do not overlap.
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        if !self.intersects(other) {
            return None;
        }

        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width as i32).min(other.x + other.width as i32);
        let y2 = (self.y + self.height as i32).min(other.y + other.height as i32);

        Some(Rect {
            x: x1,
            y: y1,
            width: (x2 - x1) as u32,
            height: (y2 - y1) as u32,
        })
    }

    /// Computes the smallest rectangle containing both inputs.
    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }

        let x1 = self.x.min(other.x);
        let y1 = self.y.min(other.y);
        let x2 = (self.x + self.width as i32).max(other.x + other.width as i32);
        let y2 = (self.y + self.height as i32).max(other.y + other.height as i32);

        Rect {
            x: x1,
            y: y1,
            width: (x2 - x1) as u32,
            height: (y2 - y1) as u32,
        }
    }

    /// Checks whether this rectangle completely contains another.
    pub fn contains(&self, other: &Rect) -> bool {
        !other.is_empty()
            && other.x >= self.x
            && other.y >= self.y
            && other.x + other.width as i32 <= self.x + self.width as i32
            && other.y + other.height as i32 <= self.y + self.height as i32
    }

    /// Checks whether this rectangle touches another (overlap or shared edge).
    pub fn is_adjacent(&self, other: &Rect) -> bool {
        let h_adjacent = (self.x + self.width as i32 >= other.x
            && self.x <= other.x + other.width as i32)
            && (self.y < other.y + other.height as i32 && other.y < self.y + self.height as i32);

        let v_adjacent = (self.y + self.height as i32 >= other.y
            && self.y <= other.y + other.height as i32)
            && (self.x < other.x + other.width as i32 && other.x < self.x + self.width as i32);

        h_adjacent || v_adjacent
    }

    /// Returns this rectangle shifted by the given offset.
    pub fn translated(&self, dx: i32, dy: i32) -> Rect {
        Rect {
            x: self.x + dx,
            y: self.y + dy,
            width: self.width,
            height: self.height,
        }
    }
}

/// A set of dirty rectangles.
///
/// Rectangles in the set may overlap after `add`; `coalesce` merges
/// overlapping and edge-adjacent rects into bounding boxes to bound the set
/// size. Painting the same pixel twice is harmless (source-replace), so the
/// set only ever over-approximates, never under-approximates, the dirty area.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Region {
    rects: Vec<Rect>,
}

impl Region {
    /// Creates an empty region.
    pub fn new() -> Self {
        Self { rects: Vec::new() }
    }

    /// Creates a region covering a single rectangle.
    pub fn from_rect(rect: Rect) -> Self {
        let mut region = Self::new();
        region.add(rect);
        region
    }

    /// Adds a rectangle to the region.
    ///
    /// Rects already covered by the set are dropped; rects covering existing
    /// entries replace them.
    pub fn add(&mut self, rect: Rect) {
        if rect.is_empty() {
            return;
        }
        if self.rects.iter().any(|r| r.contains(&rect)) {
            return;
        }
        self.rects.retain(|r| !rect.contains(r));
        self.rects.push(rect);
    }

    /// Adds every rectangle of another region.
    pub fn add_region(&mut self, other: &Region) {
        for rect in &other.rects {
            self.add(*rect);
        }
    }

    /// Returns the union of two regions.
    pub fn union(&self, other: &Region) -> Region {
        let mut result = self.clone();
        result.add_region(other);
        result
    }

    /// True when the region covers no pixels.
    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    /// Removes all rectangles.
    pub fn clear(&mut self) {
        self.rects.clear();
    }

    /// Number of rectangles currently in the set.
    pub fn rect_count(&self) -> usize {
        self.rects.len()
    }

    /// Iterates over the rectangles.
    pub fn rects(&self) -> impl Iterator<Item = &Rect> {
        self.rects.iter()
    }

    /// Checks whether the region intersects the given rectangle.
    pub fn intersects(&self, rect: &Rect) -> bool {
        self.rects.iter().any(|r| r.intersects(rect))
    }

    /// Checks whether any single rectangle of the region fully covers the
    /// given rectangle.
    pub fn covers(&self, rect: &Rect) -> bool {
        self.rects.iter().any(|r| r.contains(rect))
    }

    /// Smallest rectangle containing the whole region.
    pub fn bounding_rect(&self) -> Rect {
        let mut bounds = Rect::new(0, 0, 0, 0);
        for rect in &self.rects {
            bounds = bounds.union(rect);
        }
        bounds
    }

    /// Merges overlapping and edge-adjacent rectangles.
    ///
    /// Sorted by scanline then x for deterministic output.
    pub fn coalesce(&mut self) {
        if self.rects.len() <= 1 {
            return;
        }
        self.rects.sort_by_key(|r| (r.y, r.x));
        let mut merged: Vec<Rect> = Vec::with_capacity(self.rects.len());
        let mut current = self.rects[0];
        for r in &self.rects[1..] {
            if current.intersects(r) || current.is_adjacent(r) {
                current = current.union(r);
            } else {
                merged.push(current);
                current = *r;
            }
        }
        merged.push(current);
        self.rects = merged;
    }
}
