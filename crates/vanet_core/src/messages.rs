//! Vehicle-to-vehicle messages.

use crate::map::{Point, StreetDirection, StreetId};
use crate::vehicle::VehicleId;

/// Identity of a message across forwards: origin vehicle plus its sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageKey {
    pub origin: VehicleId,
    pub seq: u32,
}

/// Penalty announcement for a street, typically emitted by a vehicle stuck in a jam.
#[derive(Debug, Clone, PartialEq)]
pub struct PenaltyNotice {
    pub street: StreetId,
    pub direction: StreetDirection,
    pub value: f64,
    /// Expiry of the penalty itself once applied.
    pub penalty_valid_until: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Penalty {
        key: MessageKey,
        /// Vehicle that last transmitted the message.
        sender: VehicleId,
        destination: Point,
        radius: f64,
        /// The message is dropped after this time.
        valid_until: u64,
        /// Rebroadcast to every neighbour instead of forwarding along a line.
        flooding: bool,
        notice: PenaltyNotice,
    },
}

impl Message {
    pub fn key(&self) -> MessageKey {
        match self {
            Message::Penalty { key, .. } => *key,
        }
    }

    pub fn sender(&self) -> VehicleId {
        match self {
            Message::Penalty { sender, .. } => *sender,
        }
    }

    pub fn valid_until(&self) -> u64 {
        match self {
            Message::Penalty { valid_until, .. } => *valid_until,
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now > self.valid_until()
    }

    /// Whether `position` lies inside the destination area.
    pub fn is_for(&self, position: &Point) -> bool {
        match self {
            Message::Penalty {
                destination,
                radius,
                ..
            } => destination.distance_sq(position) <= radius * radius,
        }
    }

    pub fn destination(&self) -> Point {
        match self {
            Message::Penalty { destination, .. } => *destination,
        }
    }

    pub fn is_flooding(&self) -> bool {
        match self {
            Message::Penalty { flooding, .. } => *flooding,
        }
    }

    /// Copy of the message as retransmitted by `sender`.
    pub fn forwarded_by(&self, sender: VehicleId) -> Message {
        let mut copy = self.clone();
        match &mut copy {
            Message::Penalty { sender: s, .. } => *s = sender,
        }
        copy
    }
}

/// Addressing of an outgoing message.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// Every vehicle within communication range.
    Broadcast,
    /// One known neighbour.
    To(VehicleId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub delivery: Delivery,
    pub message: Message,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notice() -> PenaltyNotice {
        PenaltyNotice {
            street: 3,
            direction: StreetDirection::Forward,
            value: 500.0,
            penalty_valid_until: 20_000,
        }
    }

    #[test]
    fn destination_area_is_inclusive() {
        let message = Message::Penalty {
            key: MessageKey { origin: 1, seq: 0 },
            sender: 1,
            destination: Point::new(0.0, 0.0),
            radius: 100.0,
            valid_until: 1000,
            flooding: false,
            notice: notice(),
        };
        assert!(message.is_for(&Point::new(100.0, 0.0)));
        assert!(!message.is_for(&Point::new(100.0, 1.0)));
        assert!(!message.is_expired(1000));
        assert!(message.is_expired(1001));
    }

    #[test]
    fn forwarding_keeps_identity() {
        let message = Message::Penalty {
            key: MessageKey { origin: 1, seq: 4 },
            sender: 1,
            destination: Point::new(0.0, 0.0),
            radius: 100.0,
            valid_until: 1000,
            flooding: true,
            notice: notice(),
        };
        let copy = message.forwarded_by(9);
        assert_eq!(copy.sender(), 9);
        assert_eq!(copy.key(), message.key());
    }
}
