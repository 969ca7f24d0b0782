//! Occurrence records and the cleaning stages that narrow them.
//!
//! Stages, in pipeline order:
//!   validate (missing / non-finite / out-of-range coordinates dropped) →
//!   dedup (exact `(lat, lon)` duplicates dropped, first seen wins) →
//!   within (strict study-area filter) → extent (padded crop box).
//!
//! Each stage borrows its input and returns a new set.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::coords::{BoundingBox, LatLon};
use crate::error::Result;

/// A record as read from the source table, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawOccurrence {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Passthrough columns from the source table.
    pub attributes: BTreeMap<String, String>,
}

impl RawOccurrence {
    pub fn new(latitude: Option<f64>, longitude: Option<f64>) -> Self {
        Self { latitude, longitude, attributes: BTreeMap::new() }
    }
}

/// A validated occurrence: finite coordinates inside the legal ranges.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OccurrenceRecord {
    location: LatLon,
    attributes: BTreeMap<String, String>,
}

impl OccurrenceRecord {
    /// None unless `location` is finite and in range.
    pub fn new(location: LatLon, attributes: BTreeMap<String, String>) -> Option<Self> {
        location.is_valid().then_some(Self { location, attributes })
    }

    pub fn location(&self) -> LatLon {
        self.location
    }

    pub fn latitude(&self) -> f64 {
        self.location.lat
    }

    pub fn longitude(&self) -> f64 {
        self.location.lon
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }
}

/// Ordered sequence of validated occurrence records.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OccurrenceSet {
    records: Vec<OccurrenceRecord>,
}

impl OccurrenceSet {
    /// Coordinate validator: keep raw records whose coordinates are both
    /// present, finite and in range. Empty input yields an empty set.
    pub fn validate(raw: &[RawOccurrence]) -> Self {
        let records = raw
            .iter()
            .filter_map(|r| {
                let location = LatLon::new(r.latitude?, r.longitude?);
                OccurrenceRecord::new(location, r.attributes.clone())
            })
            .collect();
        Self { records }
    }

    /// Build directly from points, without attributes. Invalid points are dropped.
    pub fn from_points(points: &[LatLon]) -> Self {
        let records = points.iter().filter_map(|&p| OccurrenceRecord::new(p, BTreeMap::new())).collect();
        Self { records }
    }

    /// Keep the first record of each exact `(lat, lon)` pair.
    ///
    /// Exact float equality: `-10.5` and `-10.50001` are distinct points.
    pub fn dedup(&self) -> Self {
        let mut seen = HashSet::with_capacity(self.records.len());
        let records = self
            .records
            .iter()
            .filter(|r| seen.insert(r.location.exact_key()))
            .cloned()
            .collect();
        Self { records }
    }

    /// Keep records strictly inside `area`; edge points are dropped.
    pub fn within(&self, area: &BoundingBox) -> Self {
        let records = self.records.iter().filter(|r| area.contains_strict(r.location)).cloned().collect();
        Self { records }
    }

    /// Extent builder: padded box around every record.
    pub fn extent(&self, buffer_deg: f64) -> Result<BoundingBox> {
        BoundingBox::around(&self.coordinates(), buffer_deg)
    }

    /// Records at the given indices, in index order.
    pub fn subset(&self, indices: &[usize]) -> Self {
        let records = indices.iter().filter_map(|&i| self.records.get(i).cloned()).collect();
        Self { records }
    }

    pub fn coordinates(&self) -> Vec<LatLon> {
        self.records.iter().map(|r| r.location).collect()
    }

    pub fn records(&self) -> &[OccurrenceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SdmError;

    fn raw(lat: f64, lon: f64) -> RawOccurrence {
        RawOccurrence::new(Some(lat), Some(lon))
    }

    #[test]
    fn validate_drops_missing_and_non_finite() {
        let input = vec![
            raw(-12.0, -77.0),
            RawOccurrence::new(None, Some(-70.0)),
            RawOccurrence::new(Some(-10.0), None),
            raw(f64::NAN, -70.0),
            raw(-10.0, f64::INFINITY),
            raw(95.0, -70.0),
            raw(-13.5, -71.9),
        ];
        let set = OccurrenceSet::validate(&input);
        assert_eq!(set.len(), 2);
        assert_eq!(set.records()[0].location(), LatLon::new(-12.0, -77.0));
        assert_eq!(set.records()[1].location(), LatLon::new(-13.5, -71.9));
    }

    #[test]
    fn validate_empty_input_is_empty() {
        assert!(OccurrenceSet::validate(&[]).is_empty());
    }

    #[test]
    fn validate_keeps_attributes() {
        let mut r = raw(-12.0, -77.0);
        r.attributes.insert("gbifID".into(), "42".into());
        let set = OccurrenceSet::validate(&[r]);
        assert_eq!(set.records()[0].attributes().get("gbifID").map(String::as_str), Some("42"));
    }

    #[test]
    fn records_are_built_only_from_valid_locations() {
        assert!(OccurrenceRecord::new(LatLon::new(95.0, 0.0), BTreeMap::new()).is_none());
        assert!(OccurrenceRecord::new(LatLon::new(0.0, f64::NAN), BTreeMap::new()).is_none());
        assert!(OccurrenceRecord::new(LatLon::new(-12.0, -77.0), BTreeMap::new()).is_some());

        // Sets are written out for reports but read back only as raw rows.
        let set = OccurrenceSet::validate(&[raw(-12.0, -77.0)]);
        let json = serde_json::to_string(&set).unwrap();
        let back: Vec<RawOccurrence> = serde_json::from_str::<serde_json::Value>(&json)
            .unwrap()["records"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| RawOccurrence::new(r["location"]["lat"].as_f64(), r["location"]["lon"].as_f64()))
            .collect();
        assert_eq!(OccurrenceSet::validate(&back).coordinates(), set.coordinates());
    }

    #[test]
    fn dedup_first_seen_wins() {
        let mut first = raw(-12.0, -77.0);
        first.attributes.insert("order".into(), "first".into());
        let mut second = raw(-12.0, -77.0);
        second.attributes.insert("order".into(), "second".into());
        let set = OccurrenceSet::validate(&[first, raw(-13.0, -70.0), second, raw(-12.000001, -77.0)]);

        let d = set.dedup();
        assert_eq!(d.len(), 3);
        assert_eq!(d.records()[0].attributes()["order"], "first");
        assert_eq!(d.records()[2].location(), LatLon::new(-12.000001, -77.0));
        assert_eq!(d.dedup(), d);
    }

    #[test]
    fn within_is_strict() {
        let area = BoundingBox::new(-135.0, -30.0, -60.0, 15.0).unwrap();
        let set = OccurrenceSet::from_points(&[LatLon::new(0.0, -135.0), LatLon::new(0.0, -134.999)]);
        let kept = set.within(&area);
        assert_eq!(kept.coordinates(), vec![LatLon::new(0.0, -134.999)]);
    }

    #[test]
    fn extent_of_empty_set_fails() {
        assert!(matches!(OccurrenceSet::default().extent(10.0), Err(SdmError::EmptyInput(_))));
    }

    #[test]
    fn extent_pads_by_buffer() {
        let set = OccurrenceSet::from_points(&[LatLon::new(-20.0, -70.0), LatLon::new(-10.0, -60.0)]);
        let b = set.extent(10.0).unwrap();
        assert_eq!(b, BoundingBox::new(-80.0, -50.0, -30.0, 0.0).unwrap());
    }
}
