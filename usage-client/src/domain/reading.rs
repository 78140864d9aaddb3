use std::collections::BTreeMap;

use time::OffsetDateTime;

/// One interval consumption value, in kWh, starting at `ts`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub ts: OffsetDateTime,
    pub value: f64,
}

impl Reading {
    pub fn new(ts: OffsetDateTime, value: f64) -> Self {
        Self { ts, value }
    }

    /// Dedup key: the instant, independent of the UTC offset it was written with.
    pub(crate) fn instant_key(&self) -> i128 {
        self.ts.unix_timestamp_nanos()
    }
}

/// Readings produced by one fetch, sorted ascending and unique by instant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadingsBatch {
    readings: Vec<Reading>,
}

impl ReadingsBatch {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a batch from readings in arrival order.
    ///
    /// When two readings share an instant the later one wins.
    pub fn from_readings<I>(readings: I) -> Self
    where
        I: IntoIterator<Item = Reading>,
    {
        let mut by_instant: BTreeMap<i128, Reading> = BTreeMap::new();
        for reading in readings {
            by_instant.insert(reading.instant_key(), reading);
        }

        Self {
            readings: by_instant.into_values().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Reading> {
        self.readings.iter()
    }

    pub fn as_slice(&self) -> &[Reading] {
        &self.readings
    }

    pub fn first(&self) -> Option<&Reading> {
        self.readings.first()
    }
}

impl<'a> IntoIterator for &'a ReadingsBatch {
    type Item = &'a Reading;
    type IntoIter = std::slice::Iter<'a, Reading>;

    fn into_iter(self) -> Self::IntoIter {
        self.readings.iter()
    }
}
