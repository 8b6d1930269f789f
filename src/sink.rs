//! # Output Sink
//!
//! The external collaborator the workers publish channel levels to. On real
//! hardware this is a set of GPIO-driven LEDs (red, green, blue); here it is
//! a trait so the harness can drive a logging sink in the binary and a
//! recording sink in tests.
//!
//! ## Frames
//!
//! A worker publishes one level per channel in a *pass*. The levels of one pass
//! form a [`Frame`]: a bit pattern with one bit per channel. When each channel
//! is sampled by a separate read of a mutating cell, the frame can be a
//! pattern nobody ever wrote as a whole (a torn snapshot).

use core::fmt;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::config::CHANNEL_COUNT;

// ---------------------------------------------------------------------------
// Channels and frames
// ---------------------------------------------------------------------------

/// An independently addressable boolean output channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Channel(u8);

impl Channel {
    pub const RED: Channel = Channel(0);
    pub const GREEN: Channel = Channel(1);
    pub const BLUE: Channel = Channel(2);

    /// All channels, in publish order.
    pub const ALL: [Channel; CHANNEL_COUNT] = [Self::RED, Self::GREEN, Self::BLUE];

    /// Channel by index, if it exists.
    pub const fn new(index: usize) -> Option<Self> {
        if index < CHANNEL_COUNT {
            Some(Self(index as u8))
        } else {
            None
        }
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Bit of this channel in a cell value or frame.
    #[inline]
    pub const fn mask(self) -> u32 {
        1 << self.0
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            0 => f.write_str("red"),
            1 => f.write_str("green"),
            2 => f.write_str("blue"),
            n => write!(f, "ch{n}"),
        }
    }
}

/// Levels of every channel, one bit per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Frame(u8);

impl Frame {
    pub const EMPTY: Frame = Frame(0);

    /// Frame with every channel on.
    pub const FULL: Frame = Frame(((1u32 << CHANNEL_COUNT as u32) - 1) as u8);

    /// Keep the channel bits of `value`, drop the rest.
    pub const fn from_bits(value: u32) -> Self {
        Self((value & Self::FULL.0 as u32) as u8)
    }

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0 as u32
    }

    #[inline]
    pub const fn is_on(self, channel: Channel) -> bool {
        self.bits() & channel.mask() != 0
    }

    /// Copy of this frame with `channel` set to `on`.
    #[must_use]
    pub const fn with(self, channel: Channel, on: bool) -> Self {
        if on {
            Self::from_bits(self.bits() | channel.mask())
        } else {
            Self::from_bits(self.bits() & !channel.mask())
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Sink interface
// ---------------------------------------------------------------------------

/// Why a channel is unusable.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("channel {channel} is not wired")]
    NotWired { channel: Channel },
    #[error("channel {channel} faulted: {reason}")]
    Faulted { channel: Channel, reason: String },
}

/// Consumer of published channel levels.
///
/// `ready` is called once per channel before any worker exists; an error there
/// aborts the run. `set_channel` is called concurrently from every worker.
pub trait OutputSink: Send + Sync {
    /// Configure `channel` as an output and confirm it is usable.
    fn ready(&self, channel: Channel) -> Result<(), SinkError>;

    /// Drive `channel` to `on`.
    fn set_channel(&self, channel: Channel, on: bool);

    /// Called by worker `task` after it finished a publish pass. The frame is
    /// the set of levels that worker published in that pass.
    fn frame(&self, _task: usize, _frame: Frame) {}
}

// ---------------------------------------------------------------------------
// Logging sink
// ---------------------------------------------------------------------------

/// Sink that renders channel writes as `tracing` events.
#[derive(Debug, Clone, Copy)]
pub struct TraceSink {
    wired: Frame,
}

impl TraceSink {
    /// Sink with every channel wired.
    pub const fn new() -> Self {
        Self { wired: Frame::FULL }
    }

    /// Sink where only the channels set in `wired` pass the readiness check.
    pub const fn with_wiring(wired: Frame) -> Self {
        Self { wired }
    }
}

impl Default for TraceSink {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputSink for TraceSink {
    fn ready(&self, channel: Channel) -> Result<(), SinkError> {
        if !self.wired.is_on(channel) {
            return Err(SinkError::NotWired { channel });
        }
        debug!(%channel, "channel configured as output, initially low");
        Ok(())
    }

    fn set_channel(&self, channel: Channel, on: bool) {
        debug!(%channel, on, "channel set");
    }

    fn frame(&self, task: usize, frame: Frame) {
        trace!(task, %frame, "frame published");
    }
}

// ---------------------------------------------------------------------------
// Recording sink
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Recording {
    levels: Frame,
    writes: u64,
    frames: Vec<(usize, Frame)>,
}

/// Sink that remembers every level change and every published frame.
#[derive(Debug, Default)]
pub struct RecordingSink {
    faulty: Option<Channel>,
    recording: Mutex<Recording>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink whose readiness check fails for `channel`.
    pub fn with_fault(channel: Channel) -> Self {
        Self {
            faulty: Some(channel),
            ..Self::default()
        }
    }

    /// Current level of every channel.
    pub fn levels(&self) -> Frame {
        self.recording.lock().levels
    }

    /// Number of `set_channel` calls received.
    pub fn writes(&self) -> u64 {
        self.recording.lock().writes
    }

    /// Every frame published so far, in arrival order.
    pub fn frames(&self) -> Vec<Frame> {
        self.recording.lock().frames.iter().map(|&(_, f)| f).collect()
    }

    /// Frames published by one task, in arrival order.
    pub fn frames_of(&self, task: usize) -> Vec<Frame> {
        self.recording
            .lock()
            .frames
            .iter()
            .filter(|&&(t, _)| t == task)
            .map(|&(_, f)| f)
            .collect()
    }
}

impl OutputSink for RecordingSink {
    fn ready(&self, channel: Channel) -> Result<(), SinkError> {
        match self.faulty {
            Some(faulty) if faulty == channel => Err(SinkError::Faulted {
                channel,
                reason: "readiness check failed".into(),
            }),
            _ => Ok(()),
        }
    }

    fn set_channel(&self, channel: Channel, on: bool) {
        let mut rec = self.recording.lock();
        rec.levels = rec.levels.with(channel, on);
        rec.writes += 1;
    }

    fn frame(&self, task: usize, frame: Frame) {
        self.recording.lock().frames.push((task, frame));
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_masks() {
        assert_eq!(Channel::RED.mask(), 0x01);
        assert_eq!(Channel::GREEN.mask(), 0x02);
        assert_eq!(Channel::BLUE.mask(), 0x04);
        assert_eq!(Channel::new(3), None);
        assert_eq!(Channel::new(2), Some(Channel::BLUE));
    }

    #[test]
    fn test_frame_masks_foreign_bits() {
        assert_eq!(Frame::from_bits(0xFF), Frame::FULL);
        assert_eq!(Frame::from_bits(0x0D).bits(), 0x05);
        let f = Frame::EMPTY.with(Channel::RED, true).with(Channel::BLUE, true);
        assert_eq!(f.bits(), 0x05);
        assert_eq!(f.with(Channel::RED, false).bits(), 0x04);
        assert_eq!(f.to_string(), "0x05");
    }

    #[test]
    fn test_recording_sink_tracks_levels_and_frames() {
        let sink = RecordingSink::new();
        sink.set_channel(Channel::GREEN, true);
        sink.set_channel(Channel::BLUE, true);
        sink.set_channel(Channel::GREEN, false);
        sink.frame(1, Frame::from_bits(0x04));
        sink.frame(0, Frame::from_bits(0x01));

        assert_eq!(sink.levels().bits(), 0x04);
        assert_eq!(sink.writes(), 3);
        assert_eq!(sink.frames(), vec![Frame::from_bits(0x04), Frame::from_bits(0x01)]);
        assert_eq!(sink.frames_of(0), vec![Frame::from_bits(0x01)]);
    }

    #[test]
    fn test_readiness_failures() {
        let sink = RecordingSink::with_fault(Channel::BLUE);
        assert!(sink.ready(Channel::RED).is_ok());
        assert!(matches!(
            sink.ready(Channel::BLUE),
            Err(SinkError::Faulted { channel: Channel::BLUE, .. })
        ));

        let unwired = TraceSink::with_wiring(Frame::from_bits(0x03));
        assert!(unwired.ready(Channel::GREEN).is_ok());
        assert!(matches!(
            unwired.ready(Channel::BLUE),
            Err(SinkError::NotWired { channel: Channel::BLUE })
        ));
    }
}
