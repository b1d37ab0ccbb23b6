//! Batch analytics over the record store.
//!
//! Both reports load the full store in insertion order and treat each of
//! the two columns independently:
//! - descriptive statistics: sample mean and Bessel-corrected standard deviation
//! - linear trend: least-squares fit of `value = slope * index + intercept`
//!   against 0-based record position, evaluated at the next position `n`

use crate::error::AnalyticsError;
use crate::storage::{Record, RecordStore};
use std::fmt::Write;

/// Minimum number of records either report needs.
pub const MIN_RECORDS: usize = 2;

/// Mean and sample standard deviation of one column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub mean: f64,
    pub std_dev: f64,
}

/// Fitted line over record index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trend {
    pub slope: f64,
    pub intercept: f64,
}

impl Trend {
    pub fn predict(&self, index: f64) -> f64 {
        self.slope * index + self.intercept
    }
}

pub fn describe(values: &[f64]) -> Result<Summary, AnalyticsError> {
    let n = values.len();
    if n < MIN_RECORDS {
        return Err(AnalyticsError::InsufficientData {
            required: MIN_RECORDS,
            available: n,
        });
    }

    let mean = values.iter().sum::<f64>() / n as f64;
    let squared: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    Ok(Summary {
        mean,
        std_dev: (squared / (n - 1) as f64).sqrt(),
    })
}

/// Closed-form normal equations for `value ~ index`.
pub fn fit_trend(values: &[f64]) -> Result<Trend, AnalyticsError> {
    let n = values.len() as f64;
    let (mut sx, mut sy, mut sxx, mut sxy) = (0.0, 0.0, 0.0, 0.0);
    for (i, y) in values.iter().enumerate() {
        let x = i as f64;
        sx += x;
        sy += y;
        sxx += x * x;
        sxy += x * y;
    }

    // Singular when fewer than two distinct indices.
    let det = n * sxx - sx * sx;
    if det.abs() < f64::EPSILON {
        return Err(AnalyticsError::InsufficientData {
            required: MIN_RECORDS,
            available: values.len(),
        });
    }

    let slope = (n * sxy - sx * sy) / det;
    let intercept = (sy - slope * sx) / n;
    Ok(Trend { slope, intercept })
}

fn columns(records: &[Record]) -> (Vec<f64>, Vec<f64>) {
    records.iter().map(|r| (r.temperature, r.humidity)).unzip()
}

/// Descriptive statistics report for both columns.
pub fn statistics(records: &[Record]) -> Result<String, AnalyticsError> {
    let (temperature, humidity) = columns(records);
    let t = describe(&temperature)?;
    let h = describe(&humidity)?;

    let mut report = String::new();
    for (label, s) in [("Temperature", t), ("Humidity", h)] {
        let _ = writeln!(report, "{label}:");
        let _ = writeln!(report, "Mean: {:.4}", s.mean);
        let _ = writeln!(report, "Standard deviation: {:.4}", s.std_dev);
    }
    Ok(report)
}

/// Trend prediction report for the next unseen record position.
pub fn prediction(records: &[Record]) -> Result<String, AnalyticsError> {
    let (temperature, humidity) = columns(records);
    let next = records.len() as f64;
    let t = fit_trend(&temperature)?.predict(next);
    let h = fit_trend(&humidity)?.predict(next);

    let mut report = String::new();
    for (label, value) in [("Temperature", t), ("Humidity", h)] {
        let _ = writeln!(report, "{label}:");
        let _ = writeln!(report, "Predicted value: {value:.4}");
    }
    Ok(report)
}

/// Load the store and produce the statistics report.
pub fn statistics_report(store: &dyn RecordStore) -> Result<String, AnalyticsError> {
    statistics(&store.load()?)
}

/// Load the store and produce the prediction report.
pub fn prediction_report(store: &dyn RecordStore) -> Result<String, AnalyticsError> {
    prediction(&store.load()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn linear_records() -> Vec<Record> {
        vec![
            Record::new(0.0, 10.0),
            Record::new(1.0, 12.0),
            Record::new(2.0, 14.0),
        ]
    }

    #[test]
    fn test_describe() {
        let s = describe(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!((s.mean - 5.0).abs() < 1e-12);
        // sum of squares 32, n - 1 = 7
        assert!((s.std_dev - (32.0f64 / 7.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_single_record_is_insufficient() {
        let records = vec![Record::new(1.0, 2.0)];
        assert!(matches!(
            statistics(&records),
            Err(AnalyticsError::InsufficientData {
                required: 2,
                available: 1
            })
        ));
        assert!(matches!(
            prediction(&records),
            Err(AnalyticsError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_empty_store_is_insufficient() {
        assert!(matches!(
            prediction(&[]),
            Err(AnalyticsError::InsufficientData { available: 0, .. })
        ));
    }

    #[test]
    fn test_perfect_linear_trend() {
        let (temperature, humidity) = columns(&linear_records());

        let trend = fit_trend(&humidity).unwrap();
        assert!((trend.slope - 2.0).abs() < 1e-12);
        assert!((trend.intercept - 10.0).abs() < 1e-12);
        assert!((trend.predict(3.0) - 16.0).abs() < 1e-12);

        let trend = fit_trend(&temperature).unwrap();
        assert!((trend.predict(3.0) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_prediction_report() {
        let store = MemoryStore::with_records(linear_records());
        let report = prediction_report(&store).unwrap();
        assert_eq!(
            report,
            "Temperature:\nPredicted value: 3.0000\nHumidity:\nPredicted value: 16.0000\n"
        );
    }

    #[test]
    fn test_statistics_report() {
        let store = MemoryStore::with_records(linear_records());
        let report = statistics_report(&store).unwrap();
        assert_eq!(
            report,
            "Temperature:\nMean: 1.0000\nStandard deviation: 1.0000\n\
             Humidity:\nMean: 12.0000\nStandard deviation: 2.0000\n"
        );
    }
}
