//! Versioned export payload for a finalized segment.
//!
//! A closed segment becomes a [`SegmentExport`]: explicit structs with stable
//! wire names, serialized to JSON, gzip-compressed and base64-encoded into
//! the delivery envelope. The callback sink receives the same export as
//! plain JSON plus a small header map.

use crate::config::{Env, MetaInfo};
use crate::events::ResolutionSample;
use crate::query::EventExport;
use crate::segment::{CloseReason, Segment};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;
use thiserror::Error;

/// Platform discriminator for the desktop pipeline.
const PLATFORM_DESKTOP: u8 = 3;

/// Errors assembling or encoding an export payload.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("payload compression failed: {0}")]
    Compress(#[from] std::io::Error),
}

/// Segment boundary timestamps, wall clock and context uptime, plus the
/// wall time the owning context was created.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentTimes {
    pub begin_wall_time: i64,
    pub end_wall_time: i64,
    pub begin_time: i64,
    pub end_time: i64,
    pub init_wall_time: i64,
}

/// The full export of one closed segment.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentExport {
    pub seg_name: Option<String>,
    pub seg_id: String,
    pub session_id: String,
    pub user_id: Option<String>,
    pub additional_id: Option<String>,
    pub key_values: HashMap<String, String>,
    pub seg_count: u32,
    pub mode: u8,
    pub prompt: u8,
    pub platform: u8,
    pub sdk_version: String,
    pub meta: MetaInfo,
    pub times: SegmentTimes,
    pub resolution: Option<ResolutionSample>,
    pub seq_motion: Vec<Vec<f64>>,
    pub seq_key: Vec<Vec<f64>>,
    pub seq_life: Vec<Vec<f64>>,
    pub seq_resolution: Vec<Vec<f64>>,
}

impl SegmentExport {
    /// Assemble the export for a closed segment.
    pub fn new(
        segment: &Segment,
        session_id: &str,
        reason: CloseReason,
        events: EventExport,
        meta: MetaInfo,
        init_wall_millis: i64,
    ) -> Self {
        Self {
            seg_name: segment.name.clone(),
            seg_id: segment.id.clone(),
            session_id: session_id.to_owned(),
            user_id: segment.user_id.clone(),
            additional_id: segment.additional_id.clone(),
            key_values: segment.key_values.clone(),
            seg_count: segment.counter,
            mode: segment.mode as u8,
            prompt: reason as u8,
            platform: PLATFORM_DESKTOP,
            sdk_version: crate::VERSION.to_owned(),
            meta,
            times: SegmentTimes {
                begin_wall_time: segment.begin_wall_millis,
                end_wall_time: segment.end_wall_millis,
                begin_time: segment.begin_uptime_millis,
                end_time: segment.end_uptime_millis,
                init_wall_time: init_wall_millis,
            },
            resolution: segment.resolution.clone(),
            seq_motion: events.motion,
            seq_key: events.key,
            seq_life: events.lifecycle,
            seq_resolution: events.resolution,
        }
    }

    /// Header fields handed to the in-process callback sink alongside the
    /// JSON body.
    pub fn callback_headers(&self, app_token: &str) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert("app_token".to_owned(), app_token.to_owned());
        headers.insert("platform".to_owned(), self.platform.to_string());
        headers.insert("sdk_version".to_owned(), self.sdk_version.clone());
        headers.insert(
            "seg_name".to_owned(),
            self.seg_name.clone().unwrap_or_default(),
        );
        headers.insert("seg_id".to_owned(), self.seg_id.clone());
        headers.insert("session_id".to_owned(), self.session_id.clone());
        headers.insert("seg_count".to_owned(), self.seg_count.to_string());
        headers.insert("mode".to_owned(), self.mode.to_string());
        headers.insert("prompt".to_owned(), self.prompt.to_string());
        headers.insert(
            "user_id".to_owned(),
            self.user_id.clone().unwrap_or_default(),
        );
        headers.insert(
            "additional_id".to_owned(),
            self.additional_id.clone().unwrap_or_default(),
        );
        headers
    }

    /// Plain JSON body, for the callback sink.
    pub fn to_json(&self) -> Result<String, ExportError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Wire envelope: the export JSON gzip-compressed, base64-encoded and
    /// wrapped with the application identity fields.
    pub fn to_envelope(&self, app_token: &str, env: Env) -> Result<String, ExportError> {
        let body = serde_json::to_vec(self)?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&body)?;
        let compressed = encoder.finish()?;
        let envelope = Envelope {
            app_token,
            env: env.as_str(),
            sdk_version: &self.sdk_version,
            payload: BASE64.encode(compressed),
        };
        Ok(serde_json::to_string(&envelope)?)
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    app_token: &'a str,
    env: &'a str,
    sdk_version: &'a str,
    payload: String,
}
