//! Per-series summaries of a dataset.

use crate::types::{Dataset, Measurement, MeasurementType, Series};
use chrono::{DateTime, Utc};
use serde::Serialize;
use statrs::statistics::Statistics;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Summary of one measurement type within a dataset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesSummary {
    pub measurement_type: MeasurementType,
    pub count: usize,
    pub unit: Option<String>,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Sample standard deviation; absent with fewer than two samples
    pub std_dev: Option<f64>,
    pub sensor_modes: BTreeSet<String>,
}

impl SeriesSummary {
    fn from_records(measurement_type: MeasurementType, records: &[&Measurement]) -> Option<Self> {
        let values: Vec<f64> = records.iter().filter_map(|m| m.value).collect();
        if values.is_empty() {
            return None;
        }

        let std_dev = if values.len() > 1 {
            Some(values.iter().std_dev())
        } else {
            None
        };

        Some(Self {
            measurement_type,
            count: values.len(),
            unit: records.iter().find_map(|m| m.unit.clone()),
            first: records.iter().filter_map(|m| m.timestamp).min(),
            last: records.iter().filter_map(|m| m.timestamp).max(),
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            mean: values.iter().mean(),
            std_dev,
            sensor_modes: records
                .iter()
                .filter_map(|m| m.sensor_mode.clone())
                .collect(),
        })
    }
}

impl fmt::Display for SeriesSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = self.unit.as_deref().unwrap_or("");
        write!(
            f,
            "{}: {} values, mean {:.1}{unit}, range {:.1}-{:.1}{unit}",
            self.measurement_type, self.count, self.mean, self.min, self.max
        )?;
        if let Some(sd) = self.std_dev {
            write!(f, ", sd {sd:.2}")?;
        }
        Ok(())
    }
}

/// Summaries for every measurement type present, ordered by type.
///
/// Records without a type are grouped under `unknown`.
pub fn summarize(dataset: &Dataset) -> Vec<SeriesSummary> {
    let mut groups: BTreeMap<MeasurementType, Vec<&Measurement>> = BTreeMap::new();
    for record in dataset.iter() {
        let kind = record
            .measurement_type
            .clone()
            .unwrap_or_else(|| MeasurementType::Other("unknown".to_string()));
        groups.entry(kind).or_default().push(record);
    }

    groups
        .into_iter()
        .filter_map(|(kind, records)| SeriesSummary::from_records(kind, &records))
        .collect()
}

/// Summary of a single display series, if it has any data.
pub fn summarize_series(dataset: &Dataset, series: Series) -> Option<SeriesSummary> {
    let records: Vec<&Measurement> = dataset.series(series).collect();
    SeriesSummary::from_records(series.measurement_type(), &records)
}
