//! Binary decoders for cycling sensor characteristics.
//!
//! This module is the decoding engine: given a raw frame tagged with a
//! [`CharacteristicKind`], produce a [`TelemetrySnapshot`] plus a display
//! summary. Speed and cadence are rates derived from cumulative
//! revolution-counter / event-timestamp pairs, so the engine keeps one
//! [`ChannelState`] per tracked quantity across frames.
//!
//! All decoders are pure apart from channel-state updates and never touch the
//! transport; they are safe to call from any context.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::gatt::CharacteristicKind;
use crate::config::SensorConfig;

/// CSC event timestamps tick at 1024 Hz; power-meter crank timestamps use the
/// same resolution.
const CSC_TICK_HZ: u32 = 1024;

/// The power-measurement profile reports wheel event timestamps at 2048 Hz.
const POWER_WHEEL_TICK_HZ: u32 = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("frame too short: need {needed} bytes, got {len}")]
    TooShort { needed: usize, len: usize },
}

// Field readers. All multi-byte fields on the supported characteristics are
// little-endian.

fn read_u8(data: &[u8], offset: usize) -> Result<u8, DecodeError> {
    data.get(offset).copied().ok_or(DecodeError::TooShort {
        needed: offset + 1,
        len: data.len(),
    })
}

fn read_i8(data: &[u8], offset: usize) -> Result<i8, DecodeError> {
    Ok(read_u8(data, offset)? as i8)
}

fn read_u16_le(data: &[u8], offset: usize) -> Result<u16, DecodeError> {
    match data.get(offset..offset + 2) {
        Some(bytes) => Ok(u16::from_le_bytes([bytes[0], bytes[1]])),
        None => Err(DecodeError::TooShort {
            needed: offset + 2,
            len: data.len(),
        }),
    }
}

fn read_i16_le(data: &[u8], offset: usize) -> Result<i16, DecodeError> {
    Ok(read_u16_le(data, offset)? as i16)
}

fn read_u32_le(data: &[u8], offset: usize) -> Result<u32, DecodeError> {
    match data.get(offset..offset + 4) {
        Some(bytes) => Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        None => Err(DecodeError::TooShort {
            needed: offset + 4,
            len: data.len(),
        }),
    }
}

/// Modular width of a cumulative revolution counter: wheel counters are
/// 32-bit on the wire, crank counters 16-bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterWidth {
    U16,
    U32,
}

/// Counter and tick deltas between two samples on one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDelta {
    pub count: u32,
    pub ticks: u16,
}

/// Last seen cumulative-count / event-time pair for one tracked quantity.
///
/// Both counters wrap; deltas use modular subtraction at the counter's wire
/// width so a genuine rollover still yields a small positive delta.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelState {
    prev_count: u32,
    prev_time: u16,
}

impl ChannelState {
    /// Fold in a new sample. Returns the deltas since the previous sample, or
    /// `None` when the event timestamp has not advanced. In that case the
    /// frame carries no new information and the stored state is left alone.
    pub fn advance(
        &mut self,
        count: u32,
        event_time: u16,
        width: CounterWidth,
    ) -> Option<RateDelta> {
        let ticks = event_time.wrapping_sub(self.prev_time);
        if ticks == 0 {
            return None;
        }

        let count_delta = match width {
            CounterWidth::U32 => count.wrapping_sub(self.prev_count),
            CounterWidth::U16 => (count as u16).wrapping_sub(self.prev_count as u16) as u32,
        };

        self.prev_count = count;
        self.prev_time = event_time;

        Some(RateDelta {
            count: count_delta,
            ticks,
        })
    }
}

/// Wheel speed in km/h from a revolution delta.
fn wheel_speed_kmh(delta: RateDelta, tick_hz: u32, wheel_circumference_mm: u32) -> f64 {
    delta.count as f64 * tick_hz as f64 * 3600.0 * wheel_circumference_mm as f64
        / delta.ticks as f64
        / 1_000_000.0
}

/// Crank cadence in revolutions per minute from a revolution delta.
fn crank_rpm(delta: RateDelta) -> u32 {
    (delta.count as u64 * CSC_TICK_HZ as u64 * 60 / delta.ticks as u64) as u32
}

/// Decoded measurements from one frame. Fields are populated only when the
/// frame's identity and flag bits say the value is present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub heart_rate_bpm: Option<u16>,
    pub speed_kmh: Option<f64>,
    pub cadence_rpm: Option<u32>,
    pub power_watts: Option<i16>,
    pub power_feature_bits: Option<i16>,
    pub out_of_range: Option<bool>,
    /// Hex rendering of frames from unrecognized characteristics
    pub raw_hex: Option<String>,
}

impl TelemetrySnapshot {
    /// Display summary of the populated fields, e.g.
    /// `"power: 150 W; speed: 37.3 km/h"`.
    pub fn summary(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Some(bpm) = self.heart_rate_bpm {
            parts.push(format!("heart rate: {} bpm", bpm));
        }
        if let Some(watts) = self.power_watts {
            parts.push(format!("power: {} W", watts));
        }
        if let Some(kmh) = self.speed_kmh {
            parts.push(format!("speed: {:.1} km/h", kmh));
        }
        if let Some(rpm) = self.cadence_rpm {
            parts.push(format!("cadence: {} rpm", rpm));
        }
        if let Some(bits) = self.power_feature_bits {
            parts.push(format!("power feature bits: {}", bits));
        }
        if let Some(out) = self.out_of_range {
            parts.push(
                if out {
                    "resistance out of range"
                } else {
                    "resistance in range"
                }
                .to_string(),
            );
        }
        parts.join("; ")
    }
}

/// A snapshot paired with its display summary.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub snapshot: TelemetrySnapshot,
    pub summary: String,
}

impl DecodedFrame {
    fn new(snapshot: TelemetrySnapshot) -> Self {
        let summary = snapshot.summary();
        Self { snapshot, summary }
    }
}

/// The decoding engine: dispatches frames by characteristic identity and owns
/// the four rate-tracked channels (wheel and crank for CSC, and their
/// power-meter counterparts).
///
/// One engine per device session. Decode failures never touch channel state:
/// every field of a frame is read and validated before any channel is
/// advanced, so a malformed frame is dropped whole.
#[derive(Debug, Default)]
pub struct TelemetryEngine {
    wheel: ChannelState,
    crank: ChannelState,
    wheel_power: ChannelState,
    crank_power: ChannelState,
}

impl TelemetryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all channel state. Called when a session restarts so rates after
    /// a reconnect are not computed against counters from the previous
    /// connection.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn decode(
        &mut self,
        kind: CharacteristicKind,
        data: &[u8],
        config: &SensorConfig,
    ) -> Result<DecodedFrame, DecodeError> {
        match kind {
            CharacteristicKind::HeartRateMeasurement => decode_heart_rate(data),
            CharacteristicKind::CscMeasurement => self.decode_csc(data, config),
            CharacteristicKind::CyclingPowerMeasurement => self.decode_power(data, config),
            CharacteristicKind::CyclingPowerFeature => decode_power_feature(data),
            CharacteristicKind::EliteOutOfRange => decode_out_of_range(data),
            CharacteristicKind::Unknown(_) => Ok(decode_raw(data)),
        }
    }

    /// CSC Measurement: flag byte, then wheel data (u32 cumulative
    /// revolutions + u16 event time) if bit 0, then crank data (two u16s) if
    /// bit 1. Crank data starts at offset 1 when it is the only block, offset
    /// 7 when it follows wheel data.
    fn decode_csc(
        &mut self,
        data: &[u8],
        config: &SensorConfig,
    ) -> Result<DecodedFrame, DecodeError> {
        let flags = read_u8(data, 0)?;
        let wheel_present = flags & 0x01 != 0;
        let crank_present = flags & 0x02 != 0;

        let wheel = if wheel_present {
            Some((read_u32_le(data, 1)?, read_u16_le(data, 5)?))
        } else {
            None
        };
        let crank = if crank_present {
            let offset = if wheel_present { 7 } else { 1 };
            Some((read_u16_le(data, offset)?, read_u16_le(data, offset + 2)?))
        } else {
            None
        };

        let mut snapshot = TelemetrySnapshot::default();
        if let Some((revolutions, event_time)) = wheel {
            debug!(
                "CSC wheel: revolutions={}, event_time={}",
                revolutions, event_time
            );
            if let Some(delta) = self.wheel.advance(revolutions, event_time, CounterWidth::U32) {
                snapshot.speed_kmh = Some(wheel_speed_kmh(
                    delta,
                    CSC_TICK_HZ,
                    config.wheel_circumference_mm,
                ));
            }
        }
        if let Some((revolutions, event_time)) = crank {
            debug!(
                "CSC crank: revolutions={}, event_time={}",
                revolutions, event_time
            );
            if let Some(delta) =
                self.crank
                    .advance(revolutions as u32, event_time, CounterWidth::U16)
            {
                snapshot.cadence_rpm = Some(crank_rpm(delta));
            }
        }

        Ok(DecodedFrame::new(snapshot))
    }

    /// Cycling Power Measurement: i16 flags, i16 instantaneous power (always
    /// present), then optional wheel data (flag 0x10, offsets 4/8, 2048 Hz
    /// timestamps) and crank data (flag 0x20, offsets 10/12).
    fn decode_power(
        &mut self,
        data: &[u8],
        config: &SensorConfig,
    ) -> Result<DecodedFrame, DecodeError> {
        let flags = read_i16_le(data, 0)?;
        let power = read_i16_le(data, 2)?;

        let wheel = if flags & 0x10 != 0 {
            Some((read_u32_le(data, 4)?, read_u16_le(data, 8)?))
        } else {
            None
        };
        let crank = if flags & 0x20 != 0 {
            Some((read_u16_le(data, 10)?, read_u16_le(data, 12)?))
        } else {
            None
        };

        debug!("power: instantaneous={} W, flags={:#06x}", power, flags);

        let mut snapshot = TelemetrySnapshot {
            power_watts: Some(power),
            ..Default::default()
        };
        if let Some((revolutions, event_time)) = wheel {
            if let Some(delta) =
                self.wheel_power
                    .advance(revolutions, event_time, CounterWidth::U32)
            {
                snapshot.speed_kmh = Some(wheel_speed_kmh(
                    delta,
                    POWER_WHEEL_TICK_HZ,
                    config.wheel_circumference_mm,
                ));
            }
        }
        if let Some((revolutions, event_time)) = crank {
            if let Some(delta) =
                self.crank_power
                    .advance(revolutions as u32, event_time, CounterWidth::U16)
            {
                snapshot.cadence_rpm = Some(crank_rpm(delta));
            }
        }

        Ok(DecodedFrame::new(snapshot))
    }
}

/// Heart Rate Measurement: flag byte, then an 8- or 16-bit value at offset 1
/// depending on flag bit 0.
fn decode_heart_rate(data: &[u8]) -> Result<DecodedFrame, DecodeError> {
    let flags = read_u8(data, 0)?;
    let bpm = if flags & 0x01 != 0 {
        read_u16_le(data, 1)?
    } else {
        read_u8(data, 1)? as u16
    };
    debug!("heart rate: {} bpm", bpm);

    Ok(DecodedFrame::new(TelemetrySnapshot {
        heart_rate_bpm: Some(bpm),
        ..Default::default()
    }))
}

/// Cycling Power Feature: i16 capability bits, surfaced as a diagnostic
/// value.
fn decode_power_feature(data: &[u8]) -> Result<DecodedFrame, DecodeError> {
    let bits = read_i16_le(data, 0)?;
    Ok(DecodedFrame::new(TelemetrySnapshot {
        power_feature_bits: Some(bits),
        ..Default::default()
    }))
}

/// Elite out-of-range flag: a single signed byte, nonzero when the trainer
/// cannot reach the requested resistance.
fn decode_out_of_range(data: &[u8]) -> Result<DecodedFrame, DecodeError> {
    let flag = read_i8(data, 0)?;
    Ok(DecodedFrame::new(TelemetrySnapshot {
        out_of_range: Some(flag != 0),
        ..Default::default()
    }))
}

/// Fallback for unrecognized characteristics: render the frame as hex, and
/// include a lossy text reinterpretation in the summary for display.
fn decode_raw(data: &[u8]) -> DecodedFrame {
    if data.is_empty() {
        return DecodedFrame {
            snapshot: TelemetrySnapshot::default(),
            summary: String::new(),
        };
    }

    let mut hex = String::with_capacity(data.len() * 3);
    for byte in data {
        let _ = write!(hex, "{:02X} ", byte);
    }
    let summary = format!("{}\n{}", String::from_utf8_lossy(data), hex);

    DecodedFrame {
        snapshot: TelemetrySnapshot {
            raw_hex: Some(hex),
            ..Default::default()
        },
        summary,
    }
}
