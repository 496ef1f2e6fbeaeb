//! Bounded sensor buffers with update fan-out

use super::types::{Sensor, SensorId, SensorItem};
use std::collections::{BTreeMap, VecDeque};

/// Default capacity of every sensor buffer
pub const DEFAULT_CAPACITY: usize = 100;

/// Handle returned by [`SensorManager::on_update`]
pub type ListenerId = u64;

/// Called once per buffer mutation with the sensor id and the latest item
pub type UpdateListener = Box<dyn FnMut(&SensorId, &SensorItem) + Send>;

/// Registration and buffer, kept together so neither outlives the other
#[derive(Debug)]
struct Slot {
    sensor: Sensor,
    buffer: VecDeque<SensorItem>,
}

/// Named, bounded, typed push-data buffers
pub struct SensorManager {
    capacity: usize,
    slots: BTreeMap<SensorId, Slot>,
    listeners: Vec<(ListenerId, UpdateListener)>,
    next_listener: ListenerId,
}

impl Default for SensorManager {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl SensorManager {
    /// Create a manager whose buffers hold at most `capacity` items
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            slots: BTreeMap::new(),
            listeners: Vec::new(),
            next_listener: 1,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Register a sensor under the id derived from its kind and params.
    /// Returns true only when the id is new.
    pub fn subscribe(&mut self, sensor: Sensor) -> bool {
        let sensor = sensor.normalized();
        if self.slots.contains_key(&sensor.id) {
            tracing::debug!(sensor_id = %sensor.id, "Sensor already subscribed");
            return false;
        }
        tracing::info!(sensor_id = %sensor.id, kind = %sensor.kind, "Sensor subscribed");
        self.slots.insert(
            sensor.id.clone(),
            Slot {
                sensor,
                buffer: VecDeque::with_capacity(self.capacity),
            },
        );
        true
    }

    /// Remove a sensor together with its buffer
    pub fn unsubscribe(&mut self, id: &SensorId) -> bool {
        let removed = self.slots.remove(id).is_some();
        if removed {
            tracing::info!(sensor_id = %id, "Sensor unsubscribed");
        }
        removed
    }

    pub fn is_subscribed(&self, id: &SensorId) -> bool {
        self.slots.contains_key(id)
    }

    pub fn sensor(&self, id: &SensorId) -> Option<&Sensor> {
        self.slots.get(id).map(|slot| &slot.sensor)
    }

    /// Registered sensors ordered by id
    pub fn sensors(&self) -> impl Iterator<Item = &Sensor> {
        self.slots.values().map(|slot| &slot.sensor)
    }

    pub fn ids(&self) -> Vec<SensorId> {
        self.slots.keys().cloned().collect()
    }

    /// Buffered items oldest first
    pub fn buffer(&self, id: &SensorId) -> Option<&VecDeque<SensorItem>> {
        self.slots.get(id).map(|slot| &slot.buffer)
    }

    pub fn latest(&self, id: &SensorId) -> Option<&SensorItem> {
        self.buffer(id).and_then(VecDeque::back)
    }

    /// Route an item to the sensor it derives to and notify listeners.
    /// Returns false when no such sensor is subscribed.
    pub fn push(&mut self, item: SensorItem) -> bool {
        let id = item.sensor_id();
        let capacity = self.capacity;
        let Some(slot) = self.slots.get_mut(&id) else {
            tracing::trace!(sensor_id = %id, "No sensor for item, dropped");
            return false;
        };

        insert_bounded(&mut slot.buffer, item, capacity);

        if let Some(latest) = slot.buffer.back() {
            for (_, listener) in self.listeners.iter_mut() {
                listener(&id, latest);
            }
        }
        true
    }

    /// Seed a buffer without notifying listeners. Unknown ids are ignored.
    /// Returns the buffer length afterwards.
    pub fn prefill(&mut self, id: &SensorId, items: impl IntoIterator<Item = SensorItem>) -> usize {
        let capacity = self.capacity;
        let Some(slot) = self.slots.get_mut(id) else {
            tracing::debug!(sensor_id = %id, "Prefill for unknown sensor ignored");
            return 0;
        };
        for item in items {
            insert_bounded(&mut slot.buffer, item, capacity);
        }
        slot.buffer.len()
    }

    /// Register an update listener
    pub fn on_update(&mut self, listener: impl FnMut(&SensorId, &SensorItem) + Send + 'static) -> ListenerId {
        let id = self.next_listener;
        self.next_listener += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Remove an update listener
    pub fn off_update(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    /// Copy of every buffer, keyed by sensor id
    pub fn snapshot(&self) -> BTreeMap<SensorId, Vec<SensorItem>> {
        self.slots
            .iter()
            .map(|(id, slot)| (id.clone(), slot.buffer.iter().cloned().collect()))
            .collect()
    }
}

impl std::fmt::Debug for SensorManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorManager")
            .field("capacity", &self.capacity)
            .field("sensors", &self.slots.keys().collect::<Vec<_>>())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Candles sharing the last entry's period start replace it; everything
/// else appends, evicting the oldest item on overflow.
fn insert_bounded(buffer: &mut VecDeque<SensorItem>, item: SensorItem, capacity: usize) {
    let replaces = matches!(
        (buffer.back(), &item),
        (Some(SensorItem::Candle(last)), SensorItem::Candle(candle))
            if last.period_start == candle.period_start
    );
    if replaces {
        if let Some(last) = buffer.back_mut() {
            *last = item;
        }
        return;
    }

    while buffer.len() >= capacity {
        buffer.pop_front();
    }
    buffer.push_back(item);
}
