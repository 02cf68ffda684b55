use std::fmt;

use bitflags::bitflags;

// -----------------------------------------------------------------------------
// ----- Command ---------------------------------------------------------------

/// Command codes exchanged with the gateway. The code is the first four bytes
/// (big-endian) of every application payload, requests and responses alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Command {
    // gateway -> business, unsolicited
    ConnOpen = 1,
    ConnClose = 2,
    Transfer = 3,

    // registration handshake
    Register = 4,
    Unregister = 5,

    // business -> gateway, fire-and-forget
    ConnInfoUpdate = 6,
    ConnInfoDelete = 7,
    Broadcast = 8,
    Multicast = 9,
    SingleCast = 10,
    SingleCastBulk = 11,
    TopicSubscribe = 12,
    TopicUnsubscribe = 13,
    TopicDelete = 14,
    TopicPublish = 15,
    TopicPublishBulk = 16,
    ForceOffline = 17,
    ForceOfflineGuest = 18,

    // business -> gateway, request/response
    CheckOnline = 19,
    UniqIdList = 20,
    UniqIdCount = 21,
    TopicCount = 22,
    TopicList = 23,
    TopicUniqIdList = 24,
    TopicUniqIdCount = 25,
    ConnInfo = 26,
    Metrics = 27,
    Limit = 28,
    ConnOpenCustomUniqIdToken = 29,
}

impl Command {
    #[inline]
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        use Command::*;

        let cmd = match code {
            1 => ConnOpen,
            2 => ConnClose,
            3 => Transfer,
            4 => Register,
            5 => Unregister,
            6 => ConnInfoUpdate,
            7 => ConnInfoDelete,
            8 => Broadcast,
            9 => Multicast,
            10 => SingleCast,
            11 => SingleCastBulk,
            12 => TopicSubscribe,
            13 => TopicUnsubscribe,
            14 => TopicDelete,
            15 => TopicPublish,
            16 => TopicPublishBulk,
            17 => ForceOffline,
            18 => ForceOfflineGuest,
            19 => CheckOnline,
            20 => UniqIdList,
            21 => UniqIdCount,
            22 => TopicCount,
            23 => TopicList,
            24 => TopicUniqIdList,
            25 => TopicUniqIdCount,
            26 => ConnInfo,
            27 => Metrics,
            28 => Limit,
            29 => ConnOpenCustomUniqIdToken,
            _ => return None,
        };

        Some(cmd)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cmd::{:?}", self)
    }
}

// -----------------------------------------------------------------------------
// ----- EventMask -------------------------------------------------------------

bitflags! {
    /// Events the gateway forwards to a registered main connection.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EventMask: u32 {
        const ON_OPEN = 1;
        const ON_CLOSE = 1 << 1;
        const ON_MESSAGE = 1 << 2;
    }
}

impl EventMask {
    /// Parses `open`, `close` or `message`.
    pub fn parse_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "open" => Some(Self::ON_OPEN),
            "close" => Some(Self::ON_CLOSE),
            "message" => Some(Self::ON_MESSAGE),
            _ => None,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------
