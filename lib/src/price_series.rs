use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, Result};

#[derive(Debug, PartialEq, Clone, Copy, Deserialize, Serialize)]
pub struct PricePoint {
    pub date : NaiveDate,
    pub price : f64
}

/// Identifies one price series: a commodity, optionally restricted to a location.
#[derive(Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Clone, Deserialize, Serialize)]
pub struct SeriesKey {
    pub commodity : String,
    pub location : Option<String>
}

impl SeriesKey {
    pub fn new(commodity : &str, location : Option<&str>) -> SeriesKey {
        SeriesKey {
            commodity : commodity.trim().to_lowercase(),
            location : location.map(|l| l.trim().to_lowercase()).filter(|l| !l.is_empty())
        }
    }

    pub fn commodity(commodity : &str) -> SeriesKey {
        SeriesKey::new(commodity, None)
    }

    /// Name used for files and model keys, e.g. `rice` or `rice_uttar_pradesh`.
    pub fn storage_name(&self) -> String {
        match &self.location {
            Some(location) => format!("{}_{}", self.commodity, location).replace(' ', "_"),
            None => self.commodity.replace(' ', "_")
        }
    }
}

impl std::fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{} ({})", self.commodity, location),
            None => write!(f, "{}", self.commodity)
        }
    }
}

/// A normalized price history: dates strictly increasing, prices finite and non-negative.
#[derive(Debug, PartialEq, Clone, Serialize)]
pub struct PriceSeries {
    key : SeriesKey,
    points : Vec<PricePoint>
}

impl PriceSeries {
    /// Sorts the points chronologically, keeping the last point given for any repeated date.
    pub fn new(key : SeriesKey, points : Vec<PricePoint>) -> Result<PriceSeries> {
        if let Some(bad) = points.iter().find(|p| !p.price.is_finite() || p.price < 0.0) {
            return Err(ForecastError::InvalidSeries(
                format!("Price {} on {} for {} is not a finite non-negative value", bad.price, bad.date, key)));
        }

        let mut points = points;
        points.sort_by_key(|p| p.date);

        let mut normalized : Vec<PricePoint> = Vec::with_capacity(points.len());
        for point in points {
            match normalized.last_mut() {
                Some(last) if last.date == point.date => *last = point,
                _ => normalized.push(point)
            }
        }

        Ok(PriceSeries { key, points : normalized })
    }

    /// Daily series starting at `start_date`, one value per consecutive day.
    pub fn from_values(key : SeriesKey, start_date : NaiveDate, values : &[f64]) -> Result<PriceSeries> {
        let points = values.iter().enumerate()
            .map(|(i, &price)| PricePoint { date : start_date + Duration::days(i as i64), price })
            .collect();
        PriceSeries::new(key, points)
    }

    pub fn key(&self) -> &SeriesKey {
        &self.key
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.price).collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.points.last().map(|p| p.date)
    }

    pub fn tail(&self, count : usize) -> PriceSeries {
        let start = self.points.len().saturating_sub(count);
        PriceSeries { key : self.key.clone(), points : self.points[start..].to_vec() }
    }
}

impl<'de> Deserialize<'de> for PriceSeries {
    fn deserialize<D : serde::Deserializer<'de>>(deserializer : D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct RawSeries {
            key : SeriesKey,
            points : Vec<PricePoint>
        }

        let raw = RawSeries::deserialize(deserializer)?;
        let key = SeriesKey::new(&raw.key.commodity, raw.key.location.as_deref());
        PriceSeries::new(key, raw.points).map_err(serde::de::Error::custom)
    }
}
