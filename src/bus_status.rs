// ABOUTME: Tracks whether the bus is active and its hardware buffer is ready
// ABOUTME: by watching high-priority control frames arriving from the serial side

use crate::packet::{Frame, PRIORITY_HIGH};

const COMMAND_BUS_OFF: u8 = 0x09;
const COMMAND_BUS_ACTIVE: u8 = 0x0A;
const COMMAND_BUFFER_FULL: u8 = 0x0B;
const COMMAND_BUFFER_READY: u8 = 0x0C;

/// `active && buffer_ready`, observed before and after a status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub before: bool,
    pub after: bool,
}

impl Transition {
    pub fn became_alive(&self) -> bool {
        !self.before && self.after
    }

    pub fn became_dead(&self) -> bool {
        self.before && !self.after
    }

    pub fn changed(&self) -> bool {
        self.before != self.after
    }
}

/// `active` and `buffer_ready`, starting `(true, true)` so startup doesn't
/// spuriously lock the writer before any status frame has been seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusStatus {
    active: bool,
    buffer_ready: bool,
}

impl Default for BusStatus {
    fn default() -> Self {
        BusStatus {
            active: true,
            buffer_ready: true,
        }
    }
}

impl BusStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alive(&self) -> bool {
        self.active && self.buffer_ready
    }

    /// Feeds a frame received from the bus. Only `HIGH`-priority frames
    /// with a non-empty body can change state; everything else is a no-op.
    pub fn observe(&mut self, frame: &Frame) -> Transition {
        let before = self.alive();

        if frame.priority() == PRIORITY_HIGH && frame.has_body() {
            match frame.body()[0] {
                COMMAND_BUS_OFF => self.active = false,
                COMMAND_BUS_ACTIVE => self.active = true,
                COMMAND_BUFFER_FULL => self.buffer_ready = false,
                COMMAND_BUFFER_READY => self.buffer_ready = true,
                _ => {}
            }
        }

        Transition {
            before,
            after: self.alive(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control_frame(command: u8) -> Frame {
        Frame::build(PRIORITY_HIGH, 0x00, &[command])
    }

    #[test]
    fn starts_alive() {
        assert!(BusStatus::new().alive());
    }

    #[test]
    fn bus_off_then_active_round_trips_alive() {
        let mut status = BusStatus::new();
        let t1 = status.observe(&control_frame(0x09));
        assert!(t1.became_dead());
        assert!(!status.alive());

        let t2 = status.observe(&control_frame(0x0A));
        assert!(t2.became_alive());
        assert!(status.alive());
    }

    #[test]
    fn buffer_full_locks_even_if_bus_active() {
        let mut status = BusStatus::new();
        let t = status.observe(&control_frame(0x0B));
        assert!(t.became_dead());
        assert!(!status.alive());
    }

    #[test]
    fn low_priority_frames_never_change_status() {
        let mut status = BusStatus::new();
        let frame = Frame::build(0xFB, 0x00, &[0x09]);
        let t = status.observe(&frame);
        assert!(!t.changed());
        assert!(status.alive());
    }

    #[test]
    fn empty_body_high_priority_frame_is_a_no_op() {
        let mut status = BusStatus::new();
        let frame = Frame::build(PRIORITY_HIGH, 0x00, &[]);
        let t = status.observe(&frame);
        assert!(!t.changed());
    }
}
