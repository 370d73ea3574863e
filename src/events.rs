//! Typed event records captured by the host application.
//!
//! Each kind carries a monotonic event time in milliseconds plus its
//! kind-specific fields, and knows how to compare itself structurally
//! (ignoring the timestamp) and how to export itself as the positional
//! numeric tuple used on the wire.

use serde::{Deserialize, Serialize};

/// Common behavior of all event records stored in ring buffers.
pub trait Sample: Clone + Default + Send + 'static {
    /// Monotonic event time in milliseconds. Zero marks an unwritten slot.
    fn event_time(&self) -> i64;

    /// Structural equality ignoring the event time. Consecutive similar
    /// samples collapse to the earliest one at query time.
    fn is_similar(&self, other: &Self) -> bool;

    /// Positional numeric tuple for the export payload.
    fn export(&self) -> Vec<f64>;
}

/// Pointer event subtypes. Wire codes are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MotionKind {
    Down = 1,
    PointerDown = 2,
    Move = 3,
    PointerUp = 4,
    Up = 5,
    Wheel = 6,
}

impl Default for MotionKind {
    fn default() -> Self {
        MotionKind::Move
    }
}

/// A pointer sample: position, button and subtype.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MotionSample {
    pub event_time: i64,
    pub kind: MotionKind,
    pub x: f32,
    pub y: f32,
    pub button: i32,
}

impl MotionSample {
    pub fn new(event_time: i64, kind: MotionKind, x: f32, y: f32, button: i32) -> Self {
        Self {
            event_time,
            kind,
            x,
            y,
            button,
        }
    }
}

impl Sample for MotionSample {
    fn event_time(&self) -> i64 {
        self.event_time
    }

    fn is_similar(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.x == other.x
            && self.y == other.y
            && self.button == other.button
    }

    fn export(&self) -> Vec<f64> {
        vec![
            self.event_time as f64,
            self.kind as u8 as f64,
            self.x as f64,
            self.y as f64,
            self.button as f64,
        ]
    }
}

/// Key press direction. Wire codes are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum KeyAction {
    Down = 1,
    Up = 2,
}

impl Default for KeyAction {
    fn default() -> Self {
        KeyAction::Down
    }
}

/// A keyboard sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeySample {
    pub event_time: i64,
    pub action: KeyAction,
    pub key_code: i32,
}

impl KeySample {
    pub fn new(event_time: i64, action: KeyAction, key_code: i32) -> Self {
        Self {
            event_time,
            action,
            key_code,
        }
    }
}

impl Sample for KeySample {
    fn event_time(&self) -> i64 {
        self.event_time
    }

    fn is_similar(&self, other: &Self) -> bool {
        self.action == other.action && self.key_code == other.key_code
    }

    fn export(&self) -> Vec<f64> {
        vec![
            self.event_time as f64,
            self.action as u8 as f64,
            self.key_code as f64,
        ]
    }
}

/// Application lifecycle transitions reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum LifecycleKind {
    Resume = 1,
    Pause = 2,
    Stop = 3,
}

impl Default for LifecycleKind {
    fn default() -> Self {
        LifecycleKind::Resume
    }
}

/// A lifecycle sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LifecycleSample {
    pub event_time: i64,
    pub kind: LifecycleKind,
}

impl LifecycleSample {
    pub fn new(event_time: i64, kind: LifecycleKind) -> Self {
        Self { event_time, kind }
    }
}

impl Sample for LifecycleSample {
    fn event_time(&self) -> i64 {
        self.event_time
    }

    fn is_similar(&self, other: &Self) -> bool {
        self.kind == other.kind
    }

    fn export(&self) -> Vec<f64> {
        vec![self.event_time as f64, self.kind as u8 as f64]
    }
}

/// Screen and window geometry at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolutionSample {
    pub event_time: i64,
    pub screen_width: i32,
    pub screen_height: i32,
    pub app_width: i32,
    pub app_height: i32,
    pub window_pos_x: i32,
    pub window_pos_y: i32,
    pub refresh_rate: i32,
    pub dpi: f32,
    pub fullscreen: bool,
}

impl Sample for ResolutionSample {
    fn event_time(&self) -> i64 {
        self.event_time
    }

    // Everything but the timestamp, including the fullscreen flag.
    fn is_similar(&self, other: &Self) -> bool {
        self.screen_width == other.screen_width
            && self.screen_height == other.screen_height
            && self.app_width == other.app_width
            && self.app_height == other.app_height
            && self.window_pos_x == other.window_pos_x
            && self.window_pos_y == other.window_pos_y
            && self.refresh_rate == other.refresh_rate
            && self.dpi == other.dpi
            && self.fullscreen == other.fullscreen
    }

    fn export(&self) -> Vec<f64> {
        vec![
            self.event_time as f64,
            self.screen_width as f64,
            self.screen_height as f64,
            self.app_width as f64,
            self.app_height as f64,
            self.window_pos_x as f64,
            self.window_pos_y as f64,
            self.refresh_rate as f64,
            self.dpi as f64,
            if self.fullscreen { 1.0 } else { 0.0 },
        ]
    }
}
