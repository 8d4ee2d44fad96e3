//! Event bitmask and the notification record delivered to observers.

use bitflags::bitflags;
use std::path::PathBuf;

bitflags! {
    /// Filesystem event kinds. Values follow inotify so masks read the same in `strace`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventMask: u32 {
        const ACCESS = 0x0000_0001;
        const MODIFY = 0x0000_0002;
        const ATTRIB = 0x0000_0004;
        const CLOSE_WRITE = 0x0000_0008;
        const CLOSE_NOWRITE = 0x0000_0010;
        const OPEN = 0x0000_0020;
        const MOVED_FROM = 0x0000_0040;
        const MOVED_TO = 0x0000_0080;
        const CREATE = 0x0000_0100;
        const DELETE = 0x0000_0200;
        const DELETE_SELF = 0x0000_0400;
        const MOVE_SELF = 0x0000_0800;
        const UNMOUNT = 0x0000_2000;
        const QUEUE_OVERFLOW = 0x0000_4000;
        const IGNORED = 0x0000_8000;

        const CLOSE = Self::CLOSE_WRITE.bits() | Self::CLOSE_NOWRITE.bits();
        const MOVE = Self::MOVED_FROM.bits() | Self::MOVED_TO.bits();
        const ALL = Self::ACCESS.bits()
            | Self::MODIFY.bits()
            | Self::ATTRIB.bits()
            | Self::CLOSE.bits()
            | Self::OPEN.bits()
            | Self::MOVE.bits()
            | Self::CREATE.bits()
            | Self::DELETE.bits()
            | Self::DELETE_SELF.bits()
            | Self::MOVE_SELF.bits()
            | Self::UNMOUNT.bits()
            | Self::QUEUE_OVERFLOW.bits()
            | Self::IGNORED.bits();
    }
}

impl EventMask {
    /// Events delivered whatever mask the watch was installed with.
    pub const ALWAYS_DELIVERED: EventMask = EventMask::UNMOUNT
        .union(EventMask::QUEUE_OVERFLOW)
        .union(EventMask::IGNORED);

    /// True if exactly one event bit is set.
    pub fn is_single(self) -> bool {
        self.bits().count_ones() == 1
    }

    /// Splits the mask into its single-event bits, lowest first.
    pub fn single_events(self) -> impl Iterator<Item = EventMask> {
        let bits = (self & EventMask::ALL).bits();
        (0..u32::BITS)
            .map(|shift| 1u32 << shift)
            .filter(move |bit| bits & bit != 0)
            .map(EventMask::from_bits_retain)
    }

    /// Short lowercase name for a single event, for logs.
    pub fn event_name(self) -> &'static str {
        EVENT_NAMES
            .iter()
            .find(|(event, _)| *event == self)
            .map(|(_, name)| *name)
            .unwrap_or("multiple")
    }
}

const EVENT_NAMES: [(EventMask, &str); 15] = [
    (EventMask::ACCESS, "access"),
    (EventMask::MODIFY, "modify"),
    (EventMask::ATTRIB, "attrib"),
    (EventMask::CLOSE_WRITE, "close_write"),
    (EventMask::CLOSE_NOWRITE, "close_nowrite"),
    (EventMask::OPEN, "open"),
    (EventMask::MOVED_FROM, "moved_from"),
    (EventMask::MOVED_TO, "moved_to"),
    (EventMask::CREATE, "create"),
    (EventMask::DELETE, "delete"),
    (EventMask::DELETE_SELF, "delete_self"),
    (EventMask::MOVE_SELF, "move_self"),
    (EventMask::UNMOUNT, "unmount"),
    (EventMask::QUEUE_OVERFLOW, "queue_overflow"),
    (EventMask::IGNORED, "ignored"),
];

/// One event for one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Always a single bit.
    pub event: EventMask,
    /// The path the event is about: a child of `watched`, or `watched` itself.
    pub path: PathBuf,
    /// The watch that produced the event.
    pub watched: PathBuf,
}

impl Notification {
    pub fn new(event: EventMask, path: impl Into<PathBuf>, watched: impl Into<PathBuf>) -> Self {
        Self {
            event,
            path: path.into(),
            watched: watched.into(),
        }
    }

    /// True when the event concerns the watched path itself rather than a child.
    pub fn is_self(&self) -> bool {
        self.path == self.watched
    }

    /// Basename of `path`, if any.
    pub fn file_name(&self) -> Option<String> {
        self.path.file_name().map(|n| n.to_string_lossy().into_owned())
    }
}
