//! Pointer, wheel and touch handling for the avatar surface.
//!
//! Coordinates are physical pixels relative to the surface origin unless
//! noted otherwise. Persistence and display relocation are fire-and-forget.

use glam::Vec2;
use serde::{Deserialize, Serialize};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU64, Ordering},
};
use std::time::{Duration, Instant};

use super::anchor_layout::{Rect, Size, WorkArea, place_floating_controls};
use super::display::{DisplayBridge, DisplayInfo, relocate_if_needed, work_area_for_point};
use crate::events::{EventSink, StageEvent};
use crate::services::config::StageConfig;
use crate::services::local_store::LocalStore;
use crate::settings::{AvatarSettings, SettingKey};

pub const SCALE_MIN: f32 = 0.1;
pub const SCALE_MAX: f32 = 2.0;
pub const WHEEL_STEP: f32 = 1.1;

const POSITION_KEY: &str = "avatar.position";
const SCALE_KEY: &str = "avatar.scale";

const CONTROLS_SIZE: Size = Size {
    width: 56.0,
    height: 240.0,
};
const CONTROLS_GAP_PX: f32 = 8.0;
const CONTROLS_EDGE_MARGIN_PX: f32 = 12.0;

/// Pinch gestures shorter than this are ignored.
const MIN_PINCH_DISTANCE: f32 = 1.0;

pub fn clamp_scale(scale: f32) -> f32 {
    if scale.is_finite() {
        scale.clamp(SCALE_MIN, SCALE_MAX)
    } else {
        1.0
    }
}

#[cfg_attr(feature = "typegen", derive(specta::Type))]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionState {
    pub is_dragging: bool,
    pub is_locked: bool,
    pub is_focusing: bool,
    pub controls_visible: bool,
    pub pointer_offset: [f32; 2],
    pub position: [f32; 2],
    pub scale: f32,
}

#[derive(Debug, Clone, Copy)]
struct Pinch {
    start_distance: f32,
    start_scale: f32,
}

pub struct InteractionDriver {
    settings: AvatarSettings,
    store: LocalStore,
    events: EventSink,
    display: Option<Arc<dyn DisplayBridge>>,

    hide_delay: Duration,
    proximity_px: f32,

    base_size: Vec2,
    position: Vec2,
    scale: f32,
    surface_origin: Vec2,
    work_area: WorkArea,

    dragging: bool,
    pointer_offset: Vec2,
    pinch: Option<Pinch>,
    focusing: bool,
    controls_visible: bool,
    hide_deadline: Option<Instant>,
    /// Lock flag as last observed; the setting can flip from a toggle row.
    seen_locked: bool,

    /// Bumped on reset; relocation results from an older generation are dropped.
    generation: Arc<AtomicU64>,
    relocated: Arc<Mutex<Option<(u64, DisplayInfo)>>>,
}

impl InteractionDriver {
    pub fn new(
        settings: AvatarSettings,
        store: LocalStore,
        events: EventSink,
        config: &StageConfig,
        display: Option<Arc<dyn DisplayBridge>>,
    ) -> Self {
        let seen_locked = settings.is_locked();
        Self {
            settings,
            store,
            events,
            display,
            hide_delay: config.hide_delay,
            proximity_px: config.proximity_px,
            base_size: Vec2::new(400.0, 600.0),
            position: Vec2::ZERO,
            scale: 1.0,
            surface_origin: Vec2::ZERO,
            work_area: WorkArea {
                left: 0.0,
                top: 0.0,
                right: 1920.0,
                bottom: 1080.0,
                scale_factor: 1.0,
            },
            dragging: false,
            pointer_offset: Vec2::ZERO,
            pinch: None,
            focusing: false,
            controls_visible: false,
            hide_deadline: None,
            seen_locked,
            generation: Arc::new(AtomicU64::new(0)),
            relocated: Arc::new(Mutex::new(None)),
        }
    }

    pub fn state(&self) -> InteractionState {
        InteractionState {
            is_dragging: self.dragging,
            is_locked: self.settings.is_locked(),
            is_focusing: self.focusing,
            controls_visible: self.controls_visible,
            pointer_offset: self.pointer_offset.to_array(),
            position: self.position.to_array(),
            scale: self.scale,
        }
    }

    pub fn position(&self) -> Vec2 {
        self.position
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn is_focusing(&self) -> bool {
        self.focusing
    }

    pub fn controls_visible(&self) -> bool {
        self.controls_visible
    }

    pub fn avatar_rect(&self) -> Rect {
        Rect::from_origin_size(self.position, self.base_size * self.scale)
    }

    pub fn set_base_size(&mut self, size: Vec2) {
        if size.is_finite() && size.x > 0.0 && size.y > 0.0 {
            self.base_size = size;
        }
    }

    pub fn set_work_area(&mut self, area: WorkArea) {
        self.work_area = area;
    }

    /// Adopts the work area of the display under the avatar, falling back to
    /// the primary display. Without a display bridge this is a no-op.
    pub async fn sync_work_area(&mut self) -> Result<(), String> {
        let Some(bridge) = self.display.clone() else {
            return Ok(());
        };
        let displays = bridge.displays().await?;
        let center = self.surface_origin + self.avatar_rect().center();
        self.work_area = work_area_for_point(center, &displays);
        Ok(())
    }

    /// Surface position in virtual desktop coordinates.
    pub fn set_surface_origin(&mut self, origin: Vec2) {
        self.surface_origin = origin;
    }

    fn locked(&mut self) -> bool {
        let locked = self.settings.is_locked();
        if locked != self.seen_locked {
            self.on_lock_changed(locked);
        }
        locked
    }

    /// Starts a drag when a single pointer lands on the avatar.
    pub fn pointer_down(&mut self, p: Vec2, pointer_count: usize) -> bool {
        if pointer_count != 1 {
            // Second finger: the gesture becomes a pinch.
            self.dragging = false;
            return false;
        }
        if self.locked() || !self.avatar_rect().contains(p) {
            return false;
        }
        self.dragging = true;
        self.pointer_offset = p - self.position;
        true
    }

    pub fn pointer_move(&mut self, p: Vec2) -> bool {
        if !self.dragging || !p.is_finite() {
            return false;
        }
        if self.locked() {
            return false;
        }
        self.position = p - self.pointer_offset;
        true
    }

    pub fn pointer_up(&mut self) {
        if !self.dragging {
            return;
        }
        self.dragging = false;
        self.pointer_offset = Vec2::ZERO;
        self.store.set(POSITION_KEY, &self.position.to_array());
        self.spawn_relocation();
    }

    pub fn pointer_cancel(&mut self) {
        self.pointer_up();
    }

    /// One notch per call; negative `delta_y` zooms in.
    pub fn wheel(&mut self, delta_y: f32) -> bool {
        if self.locked() || delta_y == 0.0 || !delta_y.is_finite() {
            return false;
        }
        let factor = if delta_y < 0.0 { WHEEL_STEP } else { 1.0 / WHEEL_STEP };
        self.set_scale_centered(self.scale * factor)
    }

    pub fn touch_start(&mut self, points: &[Vec2]) {
        if points.len() != 2 || self.locked() {
            self.pinch = None;
            return;
        }
        self.dragging = false;
        let distance = points[0].distance(points[1]);
        if distance >= MIN_PINCH_DISTANCE {
            self.pinch = Some(Pinch {
                start_distance: distance,
                start_scale: self.scale,
            });
        }
    }

    pub fn touch_move(&mut self, points: &[Vec2]) -> bool {
        let Some(pinch) = self.pinch else {
            return false;
        };
        if points.len() != 2 || self.locked() {
            return false;
        }
        let distance = points[0].distance(points[1]);
        if !distance.is_finite() {
            return false;
        }
        self.set_scale_centered(pinch.start_scale * distance / pinch.start_distance)
    }

    pub fn touch_end(&mut self) {
        if self.pinch.take().is_some() {
            self.store.set(SCALE_KEY, &self.scale);
            self.store.set(POSITION_KEY, &self.position.to_array());
        }
    }

    fn set_scale_centered(&mut self, scale: f32) -> bool {
        let scale = clamp_scale(scale);
        if scale == self.scale {
            return false;
        }
        let center = self.avatar_rect().center();
        self.scale = scale;
        let size = self.base_size * scale;
        self.position = center - size * 0.5;
        self.store.set(SCALE_KEY, &self.scale);
        self.store.set(POSITION_KEY, &self.position.to_array());
        true
    }

    /// Shows the controls near the avatar and arms the hide deadline when the
    /// pointer leaves, unless it is over the controls themselves.
    pub fn pointer_proximity(&mut self, p: Vec2, now: Instant) {
        let locked = self.locked();
        if !self.settings.get(SettingKey::ProximityControls) {
            self.controls_visible = true;
            self.hide_deadline = None;
            self.set_focusing(!locked && self.avatar_rect().contains(p));
            return;
        }

        let near = self.avatar_rect().distance_to(p) <= self.proximity_px;
        if near {
            self.controls_visible = true;
            self.hide_deadline = None;
            self.set_focusing(!locked);
            return;
        }

        self.set_focusing(false);
        if self.controls_visible && self.controls_rect().contains(p) {
            self.hide_deadline = None;
        } else if self.controls_visible && self.hide_deadline.is_none() {
            self.hide_deadline = Some(now + self.hide_delay);
        }
    }

    fn set_focusing(&mut self, focused: bool) {
        if self.focusing != focused {
            self.focusing = focused;
            self.events.emit(StageEvent::AvatarFocusChanged { focused });
        }
    }

    /// Fires the hide deadline and applies finished relocations.
    pub fn tick(&mut self, now: Instant) {
        self.locked();
        if let Some(deadline) = self.hide_deadline {
            if now >= deadline {
                self.hide_deadline = None;
                self.controls_visible = false;
            }
        }

        let relocated = self.relocated.lock().ok().and_then(|mut r| r.take());
        if let Some((generation, display)) = relocated {
            if generation == self.generation.load(Ordering::SeqCst) {
                self.work_area = display.work_area();
                self.events.emit(StageEvent::DisplaySwitched {
                    display_id: display.id,
                });
            }
        }
    }

    pub fn set_locked(&mut self, locked: bool) {
        self.settings.set(SettingKey::Locked, locked);
        self.locked();
    }

    fn on_lock_changed(&mut self, locked: bool) {
        self.seen_locked = locked;
        if locked {
            if self.dragging {
                self.pointer_up();
            }
            self.pinch = None;
            self.set_focusing(false);
        }
        log::info!("avatar {}", if locked { "locked" } else { "unlocked" });
        self.events.emit(StageEvent::LockToggled { locked });
    }

    /// Whether the render surface should let pointer events through.
    pub fn pointer_passthrough(&self) -> bool {
        self.settings.is_locked()
    }

    pub fn controls_anchor(&self) -> Vec2 {
        place_floating_controls(
            self.avatar_rect(),
            CONTROLS_SIZE,
            self.work_area,
            CONTROLS_GAP_PX,
            CONTROLS_EDGE_MARGIN_PX,
        )
    }

    pub fn controls_rect(&self) -> Rect {
        let anchor = self.controls_anchor();
        Rect::new(anchor.x, anchor.y, CONTROLS_SIZE.width, CONTROLS_SIZE.height)
    }

    /// Reads the persisted position and scale.
    pub fn restore(&mut self) {
        if let Some(scale) = self.store.get::<f32>(SCALE_KEY) {
            self.scale = clamp_scale(scale);
        }
        if let Some([x, y]) = self.store.get::<[f32; 2]>(POSITION_KEY) {
            let p = Vec2::new(x, y);
            if p.is_finite() {
                self.position = p;
            }
        }
    }

    /// Drops every transient gesture and invalidates in-flight relocations.
    pub fn reset(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut r) = self.relocated.lock() {
            *r = None;
        }
        self.dragging = false;
        self.pointer_offset = Vec2::ZERO;
        self.pinch = None;
        self.hide_deadline = None;
        self.controls_visible = false;
        self.set_focusing(false);
    }

    fn spawn_relocation(&self) {
        let Some(bridge) = self.display.clone() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            log::debug!("display relocation skipped: no runtime");
            return;
        };

        let center = self.surface_origin + self.avatar_rect().center();
        let generation = self.generation.clone();
        let expected = generation.load(Ordering::SeqCst);
        let slot = self.relocated.clone();
        handle.spawn(async move {
            match relocate_if_needed(bridge.as_ref(), center).await {
                Ok(Some(display)) => {
                    if generation.load(Ordering::SeqCst) != expected {
                        log::debug!("display relocation finished after reset; dropped");
                        return;
                    }
                    if let Ok(mut slot) = slot.lock() {
                        *slot = Some((expected, display));
                    }
                }
                Ok(None) => {}
                Err(err) => log::warn!("display relocation failed: {}", err),
            }
        });
    }
}
