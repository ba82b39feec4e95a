//! Multi-display placement: which display the avatar lives on and when it
//! should move to another one.

use futures_util::future::BoxFuture;
use glam::Vec2;
use serde::{Deserialize, Serialize};

use super::anchor_layout::{Rect, WorkArea};

#[cfg_attr(feature = "typegen", derive(specta::Type))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayInfo {
    pub id: String,
    /// Work area in virtual desktop coordinates.
    pub bounds: Rect,
    pub scale_factor: f32,
    #[serde(default)]
    pub primary: bool,
}

impl DisplayInfo {
    pub fn work_area(&self) -> WorkArea {
        WorkArea::from_rect(self.bounds, self.scale_factor)
    }
}

/// Host primitives for querying and switching displays.
pub trait DisplayBridge: Send + Sync {
    fn displays(&self) -> BoxFuture<'_, Result<Vec<DisplayInfo>, String>>;
    fn current_display(&self) -> BoxFuture<'_, Result<Option<String>, String>>;
    fn move_to_display(&self, id: &str) -> BoxFuture<'_, Result<(), String>>;
}

/// Display that should host a point at `center`, if it is not `current_id`.
///
/// Returns `None` when the point is still on the current display or on no
/// known display at all.
pub fn relocation_target<'a>(
    center: Vec2,
    current_id: Option<&str>,
    displays: &'a [DisplayInfo],
) -> Option<&'a DisplayInfo> {
    if let Some(current) = current_id.and_then(|id| displays.iter().find(|d| d.id == id)) {
        if current.bounds.contains(center) {
            return None;
        }
    }
    displays
        .iter()
        .find(|d| d.bounds.contains(center) && Some(d.id.as_str()) != current_id)
}

/// Work area for a point: its display, else the primary one, else a
/// 1920x1080 fallback.
pub fn work_area_for_point(center: Vec2, displays: &[DisplayInfo]) -> WorkArea {
    displays
        .iter()
        .find(|d| d.bounds.contains(center))
        .or_else(|| displays.iter().find(|d| d.primary))
        .map(DisplayInfo::work_area)
        .unwrap_or(WorkArea {
            left: 0.0,
            top: 0.0,
            right: 1920.0,
            bottom: 1080.0,
            scale_factor: 1.0,
        })
}

/// Queries the host and moves the surface when `center` has left the
/// current display. Returns the new display if a move happened.
pub async fn relocate_if_needed(
    bridge: &dyn DisplayBridge,
    center: Vec2,
) -> Result<Option<DisplayInfo>, String> {
    let displays = bridge.displays().await?;
    if displays.len() < 2 {
        return Ok(None);
    }
    let current = bridge.current_display().await?;
    let Some(target) = relocation_target(center, current.as_deref(), &displays) else {
        return Ok(None);
    };
    bridge.move_to_display(&target.id).await?;
    log::info!(
        "avatar moved from display {} to {}",
        current.as_deref().unwrap_or("?"),
        target.id
    );
    Ok(Some(target.clone()))
}
