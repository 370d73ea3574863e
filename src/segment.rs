//! Segment model: one user-visible interaction window.

use crate::events::ResolutionSample;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Name reserved for the synthetic segment emitted when a context starts.
pub const INIT_SEGMENT_NAME: &str = "INIT";

/// How a segment was opened. Wire codes are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SegmentMode {
    /// Opened by tracking mode, rolled over automatically.
    Tracking = 1,
    /// Opened and closed by explicit host calls.
    Manual = 2,
}

/// Why a segment was closed. Wire codes are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CloseReason {
    DeveloperRequested = 1,
    MaxSegmentsReached = 2,
    AmountLimit = 3,
    DurationLimit = 4,
}

/// One open interaction window. Created on a begin command and mutated only
/// by the owning command loop until it is closed and dispatched.
#[derive(Debug, Clone)]
pub struct Segment {
    pub name: Option<String>,
    pub id: String,
    pub user_id: Option<String>,
    pub additional_id: Option<String>,
    pub key_values: HashMap<String, String>,
    pub mode: SegmentMode,
    /// 1-based position in the session, assigned by the command loop.
    pub counter: u32,
    pub begin_wall_millis: i64,
    pub begin_uptime_millis: i64,
    pub end_wall_millis: i64,
    pub end_uptime_millis: i64,
    /// Geometry snapshot frozen when the segment opened.
    pub resolution: Option<ResolutionSample>,
}

impl Segment {
    pub fn new(name: Option<String>, id: String, mode: SegmentMode) -> Self {
        Self {
            name,
            id,
            user_id: None,
            additional_id: None,
            key_values: HashMap::new(),
            mode,
            counter: 0,
            begin_wall_millis: 0,
            begin_uptime_millis: 0,
            end_wall_millis: 0,
            end_uptime_millis: 0,
            resolution: None,
        }
    }
}
