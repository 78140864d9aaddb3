//! Normalization of provider reading records into a `ReadingsBatch`.

use time::{format_description::well_known::Rfc3339, macros::datetime, OffsetDateTime};
use tracing::warn;
use usage_client::{Reading, ReadingsBatch};

use crate::error::FetchError;

/// One reading record as the provider reports it.
///
/// `end_time` is carried for completeness and dropped during normalization.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRead {
    pub start_time: String,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    InvalidValue,
    OutOfRange,
}

/// Pure validation of a single reading.
///
/// Rules:
/// - value must be a non-negative number.
/// - ts must be within a broad sanity window [2000-01-01, 2100-01-01).
pub fn validate_reading(reading: &Reading) -> Result<(), Rejection> {
    if reading.value < 0.0 || reading.value.is_nan() {
        return Err(Rejection::InvalidValue);
    }

    let min_ts = datetime!(2000-01-01 00:00:00 UTC);
    let max_ts = datetime!(2100-01-01 00:00:00 UTC);

    if reading.ts < min_ts || reading.ts >= max_ts {
        return Err(Rejection::OutOfRange);
    }

    Ok(())
}

/// Normalized batch plus the number of records that were dropped.
#[derive(Debug, Clone, Default)]
pub struct Normalized {
    pub batch: ReadingsBatch,
    pub discarded: usize,
}

/// Parses start times, drops records without a usable value and returns the
/// rest sorted ascending and unique by instant.
///
/// An unparsable start time fails the whole batch.
pub fn normalize_reads<I>(reads: I) -> Result<Normalized, FetchError>
where
    I: IntoIterator<Item = RawRead>,
{
    let mut readings = Vec::new();
    let mut discarded = 0usize;

    for raw in reads {
        let ts = OffsetDateTime::parse(raw.start_time.trim(), &Rfc3339).map_err(|e| {
            FetchError::Malformed(format!("invalid startTime '{}': {e}", raw.start_time))
        })?;

        let Some(value) = raw.value else {
            discarded += 1;
            metrics::counter!("readings_discarded_total", "reason" => "missing_value").increment(1);
            continue;
        };

        let reading = Reading::new(ts, value);
        if let Err(rejection) = validate_reading(&reading) {
            warn!(start_time = %raw.start_time, value, ?rejection, "discarding reading");
            discarded += 1;
            let reason = match rejection {
                Rejection::InvalidValue => "invalid_value",
                Rejection::OutOfRange => "out_of_range",
            };
            metrics::counter!("readings_discarded_total", "reason" => reason).increment(1);
            continue;
        }

        readings.push(reading);
    }

    Ok(Normalized {
        batch: ReadingsBatch::from_readings(readings),
        discarded,
    })
}
