//! Scheduled map mutations (lane blockings).
//!
//! Events are kept in a min-heap ordered by fire time; at equal times a
//! `StopBlocking` fires before a `StartBlocking`, and remaining ties fire in
//! insertion order. The queue is shared by the tick coordinator and
//! interactive editing, so all access goes through an internal lock.

use std::cmp::Ordering;
use std::collections::{BTreeSet, BinaryHeap, HashMap};
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use crate::error::{SimError, SimResult};
use crate::map::{Point, RoadMap, StreetDirection, StreetId};
use crate::routing::WayPoint;

pub type EventId = u64;

/// A stop event pairs with the nearest unpaired start blocking within this distance.
pub const STOP_PAIRING_RADIUS: f64 = 1000.0;

/// A resolved lane blockage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Blocking {
    pub street: StreetId,
    pub offset: f64,
    pub position: Point,
    pub direction: StreetDirection,
    pub lanes: u8,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EventKind {
    StartBlocking(Blocking),
    /// Ends the blocking started by the referenced event.
    StopBlocking { start: EventId },
}

impl EventKind {
    /// Sort rank at equal fire times; lower fires first.
    fn rank(&self) -> u8 {
        match self {
            EventKind::StopBlocking { .. } => 0,
            EventKind::StartBlocking(_) => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledEvent {
    pub id: EventId,
    pub time: u64,
    pub kind: EventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventState {
    Pending,
    Fired,
}

#[derive(Debug, Clone)]
struct EventRecord {
    event: ScheduledEvent,
    seq: u64,
    state: EventState,
    /// For a start blocking: the stop event paired with it.
    partner: Option<EventId>,
    /// Start blocking whose stop fired first; it installs nothing.
    cancelled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueuedEvent {
    time: u64,
    rank: u8,
    seq: u64,
    id: EventId,
}

impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering to make BinaryHeap a min-heap.
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.rank.cmp(&self.rank))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
struct EventQueueInner {
    heap: BinaryHeap<QueuedEvent>,
    records: HashMap<EventId, EventRecord>,
    active: BTreeSet<EventId>,
    next_id: EventId,
    next_seq: u64,
}

impl EventQueueInner {
    fn insert(&mut self, time: u64, kind: EventKind) -> EventId {
        let id = self.next_id;
        self.next_id += 1;
        let seq = self.next_seq;
        self.next_seq += 1;
        let event = ScheduledEvent { id, time, kind };
        self.heap.push(QueuedEvent {
            time,
            rank: kind.rank(),
            seq,
            id,
        });
        self.records.insert(
            id,
            EventRecord {
                event,
                seq,
                state: EventState::Pending,
                partner: None,
                cancelled: false,
            },
        );
        id
    }

    fn deactivate(&mut self, map: &RoadMap, start: EventId) {
        if !self.active.remove(&start) {
            return;
        }
        if let Some(EventRecord {
            event:
                ScheduledEvent {
                    kind: EventKind::StartBlocking(blocking),
                    ..
                },
            ..
        }) = self.records.get(&start)
        {
            if let Some(street) = map.street(blocking.street) {
                street.remove_blocking(start);
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct EventQueue {
    inner: Mutex<EventQueueInner>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, EventQueueInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Schedules a blocking of `lanes` lanes at the street nearest to `(x, y)`.
    pub fn add_start_blocking(
        &self,
        map: &RoadMap,
        time: u64,
        x: f64,
        y: f64,
        direction: StreetDirection,
        lanes: u8,
    ) -> SimResult<EventId> {
        let snapped = WayPoint::snap(map, x, y, 0)?;
        let blocking = Blocking {
            street: snapped.street,
            offset: snapped.offset,
            position: snapped.position,
            direction,
            lanes: lanes.max(1),
        };
        let id = self.lock().insert(time, EventKind::StartBlocking(blocking));
        debug!(event = id, time, street = blocking.street, "start blocking scheduled");
        Ok(id)
    }

    /// Schedules the end of the nearest unpaired start blocking that begins no
    /// later than `time` and lies within [`STOP_PAIRING_RADIUS`] of `(x, y)`.
    pub fn add_stop_blocking(&self, time: u64, x: f64, y: f64) -> SimResult<EventId> {
        let mut inner = self.lock();
        let target = Point::new(x, y);
        let limit = STOP_PAIRING_RADIUS * STOP_PAIRING_RADIUS;
        let mut best: Option<(f64, u64, EventId)> = None;
        for record in inner.records.values() {
            let EventKind::StartBlocking(blocking) = record.event.kind else {
                continue;
            };
            if record.partner.is_some() || record.event.time > time {
                continue;
            }
            if record.state == EventState::Fired && !inner.active.contains(&record.event.id) {
                continue;
            }
            let dist_sq = blocking.position.distance_sq(&target);
            if dist_sq >= limit {
                continue;
            }
            let better = match best {
                None => true,
                Some((best_sq, best_seq, _)) => {
                    dist_sq < best_sq || (dist_sq == best_sq && record.seq < best_seq)
                }
            };
            if better {
                best = Some((dist_sq, record.seq, record.event.id));
            }
        }
        let Some((_, _, start)) = best else {
            return Err(SimError::malformed(
                "stop blocking",
                inner.next_id as usize,
                "no unpaired start blocking nearby",
            ));
        };
        let id = inner.insert(time, EventKind::StopBlocking { start });
        if let Some(record) = inner.records.get_mut(&start) {
            record.partner = Some(id);
        }
        debug!(event = id, start, time, "stop blocking paired");
        Ok(id)
    }

    /// Deletes an event.
    ///
    /// A start blocking that still has a paired stop is in use, whether either
    /// of them fired or not; remove the stop first. Removing a stop unpairs its
    /// start and leaves an active blocking in place.
    pub fn remove_event(&self, map: &RoadMap, id: EventId) -> SimResult<()> {
        let mut inner = self.lock();
        let record = inner
            .records
            .get(&id)
            .cloned()
            .ok_or(SimError::EventNotFound(id))?;
        match record.event.kind {
            EventKind::StartBlocking(_) => {
                if record.partner.is_some() {
                    return Err(SimError::EventInUse(id));
                }
                inner.deactivate(map, id);
                inner.records.remove(&id);
            }
            EventKind::StopBlocking { start } => {
                inner.records.remove(&id);
                if let Some(start_record) = inner.records.get_mut(&start) {
                    start_record.partner = None;
                }
            }
        }
        Ok(())
    }

    /// Fires every event due at or before `now`, in order. Returns the fired ids.
    pub fn process_due(&self, map: &RoadMap, now: u64) -> Vec<EventId> {
        let mut inner = self.lock();
        let mut fired = Vec::new();
        while let Some(head) = inner.heap.peek().copied() {
            if head.time > now {
                break;
            }
            inner.heap.pop();
            let Some(record) = inner.records.get(&head.id).cloned() else {
                continue;
            };
            if record.seq != head.seq || record.state != EventState::Pending {
                continue;
            }
            match record.event.kind {
                EventKind::StartBlocking(blocking) => {
                    if !record.cancelled {
                        if let Some(street) = map.street(blocking.street) {
                            let installed = street.install_blocking(
                                head.id,
                                blocking.offset,
                                blocking.lanes,
                                blocking.direction,
                            );
                            debug!(event = head.id, street = street.id, installed, "blocking started");
                        }
                        inner.active.insert(head.id);
                    }
                }
                EventKind::StopBlocking { start } => {
                    if inner.active.contains(&start) {
                        inner.deactivate(map, start);
                        debug!(event = head.id, start, "blocking stopped");
                    } else if let Some(start_record) = inner.records.get_mut(&start) {
                        if start_record.state == EventState::Pending {
                            start_record.cancelled = true;
                        }
                    }
                }
            }
            if let Some(record) = inner.records.get_mut(&head.id) {
                record.state = EventState::Fired;
            }
            fired.push(head.id);
        }
        fired
    }

    pub fn get(&self, id: EventId) -> Option<ScheduledEvent> {
        self.lock().records.get(&id).map(|r| r.event)
    }

    pub fn state(&self, id: EventId) -> Option<EventState> {
        self.lock().records.get(&id).map(|r| r.state)
    }

    /// Stop event paired with a start blocking.
    pub fn partner_of(&self, id: EventId) -> Option<EventId> {
        self.lock().records.get(&id).and_then(|r| r.partner)
    }

    /// Start blockings currently in effect, in id order.
    pub fn active_blockings(&self) -> Vec<(EventId, Blocking)> {
        let inner = self.lock();
        inner
            .active
            .iter()
            .filter_map(|id| match inner.records.get(id)?.event.kind {
                EventKind::StartBlocking(blocking) => Some((*id, blocking)),
                EventKind::StopBlocking { .. } => None,
            })
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.lock()
            .records
            .values()
            .filter(|r| r.state == EventState::Pending)
            .count()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    /// Removes every event and lifts all active blockings.
    pub fn clear(&self, map: &RoadMap) {
        let mut inner = self.lock();
        let active: Vec<EventId> = inner.active.iter().copied().collect();
        for id in active {
            inner.deactivate(map, id);
        }
        inner.heap.clear();
        inner.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::grid_map;

    #[test]
    fn stop_sorts_before_start_at_equal_time() {
        let map = grid_map(3, 3, 1000.0);
        let queue = EventQueue::new();
        let early = queue
            .add_start_blocking(&map, 10, 500.0, 0.0, StreetDirection::Both, 1)
            .expect("start");
        let late = queue
            .add_start_blocking(&map, 50, 1500.0, 2000.0, StreetDirection::Both, 1)
            .expect("start");
        let stop = queue.add_stop_blocking(50, 500.0, 0.0).expect("stop");
        assert_eq!(queue.partner_of(early), Some(stop));

        let fired = queue.process_due(&map, 100);
        assert_eq!(fired, vec![early, stop, late]);
        let active: Vec<EventId> = queue.active_blockings().iter().map(|(id, _)| *id).collect();
        assert_eq!(active, vec![late]);
    }

    #[test]
    fn process_due_stops_at_first_future_event() {
        let map = grid_map(3, 3, 1000.0);
        let queue = EventQueue::new();
        let first = queue
            .add_start_blocking(&map, 40, 500.0, 0.0, StreetDirection::Both, 1)
            .expect("start");
        queue
            .add_start_blocking(&map, 80, 500.0, 1000.0, StreetDirection::Both, 1)
            .expect("start");
        assert_eq!(queue.process_due(&map, 40), vec![first]);
        assert_eq!(queue.pending_count(), 1);
        assert!(queue.process_due(&map, 79).is_empty());
    }

    #[test]
    fn start_installs_and_stop_removes_markers() {
        let map = grid_map(3, 3, 1000.0);
        let queue = EventQueue::new();
        let start = queue
            .add_start_blocking(&map, 0, 500.0, 0.0, StreetDirection::Forward, 4)
            .expect("start");
        queue.add_stop_blocking(200, 510.0, 0.0).expect("stop");
        let Some(EventKind::StartBlocking(blocking)) = queue.get(start).map(|e| e.kind) else {
            panic!("start event");
        };
        let street_id = blocking.street;
        let street = map.street(street_id).expect("street");
        queue.process_due(&map, 0);
        assert_eq!(street.blocked_lanes(true), street.lanes as usize);
        assert_eq!(street.blocked_lanes(false), 0);
        queue.process_due(&map, 200);
        assert_eq!(street.blocked_lanes(true), 0);
        assert!(queue.active_blockings().is_empty());
    }

    #[test]
    fn stop_without_nearby_start_is_rejected() {
        let map = grid_map(3, 3, 1000.0);
        let queue = EventQueue::new();
        queue
            .add_start_blocking(&map, 100, 0.0, 500.0, StreetDirection::Both, 1)
            .expect("start");
        // Start lies after the stop.
        assert!(queue.add_stop_blocking(50, 0.0, 500.0).is_err());
        // Too far away.
        assert!(queue.add_stop_blocking(200, 2000.0, 2000.0).is_err());
    }

    #[test]
    fn removing_fired_start_with_pending_stop_is_in_use() {
        let map = grid_map(3, 3, 1000.0);
        let queue = EventQueue::new();
        let start = queue
            .add_start_blocking(&map, 0, 500.0, 0.0, StreetDirection::Both, 1)
            .expect("start");
        let stop = queue.add_stop_blocking(500, 500.0, 0.0).expect("stop");
        queue.process_due(&map, 0);
        let err = queue.remove_event(&map, start).unwrap_err();
        assert!(matches!(err, SimError::EventInUse(id) if id == start));

        // Removing the stop unpairs it; the start can then be removed.
        queue.remove_event(&map, stop).expect("remove stop");
        assert_eq!(queue.partner_of(start), None);
        queue.remove_event(&map, start).expect("remove start");
        assert!(queue.active_blockings().is_empty());
        assert!(queue.is_empty());
    }

    #[test]
    fn start_whose_stop_already_fired_is_in_use() {
        let map = grid_map(3, 3, 1000.0);
        let queue = EventQueue::new();
        let start = queue
            .add_start_blocking(&map, 40, 500.0, 0.0, StreetDirection::Both, 1)
            .expect("start");
        let stop = queue.add_stop_blocking(120, 500.0, 0.0).expect("stop");
        assert_eq!(queue.process_due(&map, 200), vec![start, stop]);
        let err = queue.remove_event(&map, start).unwrap_err();
        assert!(matches!(err, SimError::EventInUse(id) if id == start));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn pending_start_with_a_stop_is_in_use() {
        let map = grid_map(3, 3, 1000.0);
        let queue = EventQueue::new();
        let start = queue
            .add_start_blocking(&map, 100, 500.0, 0.0, StreetDirection::Both, 1)
            .expect("start");
        let stop = queue.add_stop_blocking(500, 500.0, 0.0).expect("stop");
        assert!(matches!(
            queue.remove_event(&map, start),
            Err(SimError::EventInUse(_))
        ));
        queue.remove_event(&map, stop).expect("remove stop");
        queue.remove_event(&map, start).expect("remove start");
        assert!(queue.is_empty());
        assert!(queue.process_due(&map, 1000).is_empty());
    }

    #[test]
    fn stop_firing_before_its_start_cancels_it() {
        let map = grid_map(3, 3, 1000.0);
        let queue = EventQueue::new();
        let start = queue
            .add_start_blocking(&map, 50, 500.0, 0.0, StreetDirection::Both, 1)
            .expect("start");
        let stop = queue.add_stop_blocking(50, 500.0, 0.0).expect("stop");
        let Some(EventKind::StartBlocking(blocking)) = queue.get(start).map(|e| e.kind) else {
            panic!("start event");
        };
        assert_eq!(queue.process_due(&map, 50), vec![stop, start]);
        assert!(queue.active_blockings().is_empty());
        let street = map.street(blocking.street).expect("street");
        assert_eq!(street.blocked_lanes(true), 0);
    }
}
