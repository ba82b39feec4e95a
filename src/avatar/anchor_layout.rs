use glam::Vec2;
use serde::{Deserialize, Serialize};

#[cfg_attr(feature = "typegen", derive(specta::Type))]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rect {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(left: f32, top: f32, width: f32, height: f32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn from_origin_size(origin: Vec2, size: Vec2) -> Self {
        Self::new(origin.x, origin.y, size.x, size.y)
    }

    pub fn right(&self) -> f32 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.top + self.height
    }

    pub fn center_x(&self) -> f32 {
        self.left + self.width * 0.5
    }

    pub fn center_y(&self) -> f32 {
        self.top + self.height * 0.5
    }

    pub fn center(&self) -> Vec2 {
        Vec2::new(self.center_x(), self.center_y())
    }

    pub fn contains(&self, p: Vec2) -> bool {
        p.x >= self.left && p.x <= self.right() && p.y >= self.top && p.y <= self.bottom()
    }

    /// Euclidean distance from `p` to the rectangle; zero inside.
    pub fn distance_to(&self, p: Vec2) -> f32 {
        let dx = (self.left - p.x).max(p.x - self.right()).max(0.0);
        let dy = (self.top - p.y).max(p.y - self.bottom()).max(0.0);
        Vec2::new(dx, dy).length()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

#[cfg_attr(feature = "typegen", derive(specta::Type))]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkArea {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
    pub scale_factor: f32,
}

impl WorkArea {
    pub fn from_rect(rect: Rect, scale_factor: f32) -> Self {
        Self {
            left: rect.left,
            top: rect.top,
            right: rect.right(),
            bottom: rect.bottom(),
            scale_factor,
        }
    }

    fn margin_px(&self, logical_px: f32) -> f32 {
        (logical_px * self.scale_factor).max(0.0)
    }
}

/// Position of the floating controls column anchored to the avatar.
///
/// Inputs are in physical pixels of the surface the avatar is drawn on.
pub fn place_floating_controls(
    avatar: Rect,
    controls: Size,
    work_area: WorkArea,
    gap_logical_px: f32,
    edge_margin_logical_px: f32,
) -> Vec2 {
    let gap = work_area.margin_px(gap_logical_px);
    let margin = work_area.margin_px(edge_margin_logical_px);

    let min_x = work_area.left + margin;
    let max_x = (work_area.right - margin - controls.width).max(min_x);
    let min_y = work_area.top + margin;
    let max_y = (work_area.bottom - margin - controls.height).max(min_y);

    // Right side first, mirrored to the left when it would overflow.
    let mut x = avatar.right() + gap;
    if x > max_x {
        x = avatar.left - gap - controls.width;
    }
    x = x.clamp(min_x, max_x);

    let y = (avatar.center_y() - controls.height * 0.5).clamp(min_y, max_y);

    Vec2::new(x.round(), y.round())
}
