//! Descriptive market insights derived from a raw price history.
//!
//! Everything here is a pure function of the input values: no I/O, no model.

use chrono::NaiveDate;
use serde::{Serialize, Serializer};
use statrs::statistics::Statistics;
use strum::Display;

use crate::error::{ForecastError, Result};
use crate::price_series::PriceSeries;

pub const SHORT_WINDOW : usize = 7;
pub const LONG_WINDOW : usize = 30;

const MIN_OBSERVATIONS : usize = 3;
const PRICE_MOVE_THRESHOLD_PERCENT : f64 = 5.0;
const HIGH_VOLATILITY_PERCENT : f64 = 10.0;

#[derive(Debug, PartialEq, Eq, Clone, Copy, Display, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Decreasing
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Display, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TrendStrength {
    Strong,
    Weak
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Recommendation {
    SellSoon,
    Hold,
    Diversify,
    FollowTrend
}

impl Recommendation {
    pub fn message(&self) -> &'static str {
        match self {
            Recommendation::SellSoon => "Consider selling soon as prices are showing strong upward trend",
            Recommendation::Hold => "Consider holding as prices are showing strong downward trend",
            Recommendation::Diversify => "High market volatility detected. Consider diversifying your portfolio",
            Recommendation::FollowTrend => "Strong trend detected. Consider following the trend direction"
        }
    }
}

impl Serialize for Recommendation {
    fn serialize<S : Serializer>(&self, serializer : S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.message())
    }
}

#[derive(Debug, PartialEq, Clone, Copy, Serialize)]
pub struct PriceStatistics {
    pub mean : f64,
    pub std : f64,
    pub min : f64,
    pub max : f64
}

#[derive(Debug, PartialEq, Clone, Serialize)]
pub struct InsightBundle {
    pub current_price : f64,
    pub statistics : PriceStatistics,
    pub trend : TrendDirection,
    pub price_change_7d : Option<f64>,
    pub price_change_30d : Option<f64>,
    pub volatility : f64,
    pub moving_average_7d : Option<f64>,
    pub moving_average_30d : Option<f64>,
    pub trend_strength : Option<TrendStrength>,
    pub recommendations : Vec<Recommendation>
}

/// Percentage change between the last value and the value `periods` observations from the end.
pub fn price_change(values : &[f64], periods : usize) -> Result<f64> {
    if periods == 0 || values.len() < periods {
        return Err(ForecastError::InsufficientHistory { metric : "price change", required : periods.max(1), actual : values.len() });
    }

    let reference = values[values.len() - periods];
    let last = values[values.len() - 1];
    let change = (last - reference) / reference * 100.0;
    if !change.is_finite() {
        return Err(ForecastError::Numerical(format!("Price change from {} to {} is not finite", reference, last)));
    }
    Ok(change)
}

/// Sample standard deviation of period-over-period percentage changes, in percent.
pub fn volatility(values : &[f64]) -> Result<f64> {
    if values.len() < MIN_OBSERVATIONS {
        return Err(ForecastError::InsufficientHistory { metric : "volatility", required : MIN_OBSERVATIONS, actual : values.len() });
    }

    let changes : Vec<f64> = values.windows(2).map(|pair| (pair[1] - pair[0]) / pair[0]).collect();
    if let Some(bad) = changes.iter().position(|c| !c.is_finite()) {
        return Err(ForecastError::Numerical(
            format!("Percentage change after {} at position {} is not finite", values[bad], bad)));
    }

    Ok(changes.std_dev() * 100.0)
}

/// Trailing mean over the last `window` observations at every point; `None` until enough exist.
pub fn moving_average(values : &[f64], window : usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| if window > 0 && i + 1 >= window { Some(values[i + 1 - window..=i].mean()) } else { None })
        .collect()
}

fn trailing_mean(values : &[f64], window : usize) -> Option<f64> {
    if window == 0 || values.len() < window {
        return None;
    }
    Some(values[values.len() - window..].mean())
}

fn optional_change(values : &[f64], periods : usize) -> Result<Option<f64>> {
    match price_change(values, periods) {
        Ok(change) => Ok(Some(change)),
        Err(ForecastError::InsufficientHistory { .. }) => Ok(None),
        Err(error) => Err(error)
    }
}

fn recommend(price_change_7d : Option<f64>, volatility : f64, trend_strength : Option<TrendStrength>) -> Vec<Recommendation> {
    let mut recommendations = Vec::new();

    match price_change_7d {
        Some(change) if change > PRICE_MOVE_THRESHOLD_PERCENT => recommendations.push(Recommendation::SellSoon),
        Some(change) if change < -PRICE_MOVE_THRESHOLD_PERCENT => recommendations.push(Recommendation::Hold),
        _ => {}
    }

    if volatility > HIGH_VOLATILITY_PERCENT {
        recommendations.push(Recommendation::Diversify);
    }

    if trend_strength == Some(TrendStrength::Strong) {
        recommendations.push(Recommendation::FollowTrend);
    }

    recommendations
}

pub fn analyze(values : &[f64]) -> Result<InsightBundle> {
    if values.len() < MIN_OBSERVATIONS {
        return Err(ForecastError::InsufficientHistory { metric : "insights", required : MIN_OBSERVATIONS, actual : values.len() });
    }
    if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
        return Err(ForecastError::Numerical(format!("Cannot analyze non-finite price {}", bad)));
    }

    let first = values[0];
    let last = values[values.len() - 1];
    let statistics = PriceStatistics {
        mean : values.mean(),
        std : values.std_dev(),
        min : values.iter().copied().fold(f64::INFINITY, f64::min),
        max : values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    };
    // Equal endpoints count as decreasing.
    let trend = if last > first { TrendDirection::Increasing } else { TrendDirection::Decreasing };

    let volatility = volatility(values)?;
    let price_change_7d = optional_change(values, SHORT_WINDOW)?;
    let price_change_30d = optional_change(values, LONG_WINDOW)?;

    let moving_average_7d = trailing_mean(values, SHORT_WINDOW);
    let moving_average_30d = trailing_mean(values, LONG_WINDOW);
    let trend_strength = match (moving_average_7d, moving_average_30d) {
        (Some(short), Some(long)) if (short - long).abs() > volatility => Some(TrendStrength::Strong),
        (Some(_), Some(_)) => Some(TrendStrength::Weak),
        _ => None
    };

    Ok(InsightBundle {
        current_price : last,
        statistics,
        trend,
        price_change_7d,
        price_change_30d,
        volatility,
        moving_average_7d,
        moving_average_30d,
        trend_strength,
        recommendations : recommend(price_change_7d, volatility, trend_strength)
    })
}

#[derive(Debug, PartialEq, Clone, Serialize)]
pub struct MarketSummary {
    pub commodity : String,
    pub date : NaiveDate,
    pub highest_price : f64,
    pub highest_price_location : Option<String>,
    pub lowest_price : f64,
    pub lowest_price_location : Option<String>,
    pub average_price : f64
}

/// Compares the prices of one commodity across locations on the most recent date any of them reports.
pub fn market_summary(series_list : &[PriceSeries]) -> Result<MarketSummary> {
    let latest_date = series_list.iter().filter_map(|s| s.last_date()).max()
        .ok_or_else(|| ForecastError::InvalidSeries(String::from("No prices available for a market summary")))?;

    let latest : Vec<(&PriceSeries, f64)> = series_list.iter()
        .filter_map(|s| s.points().last().filter(|p| p.date == latest_date).map(|p| (s, p.price)))
        .collect();

    let (highest_series, highest_price) = latest.iter()
        .fold(latest[0], |best, &(s, price)| if price > best.1 { (s, price) } else { best });
    let (lowest_series, lowest_price) = latest.iter()
        .fold(latest[0], |best, &(s, price)| if price < best.1 { (s, price) } else { best });

    Ok(MarketSummary {
        commodity : highest_series.key().commodity.clone(),
        date : latest_date,
        highest_price,
        highest_price_location : highest_series.key().location.clone(),
        lowest_price,
        lowest_price_location : lowest_series.key().location.clone(),
        average_price : latest.iter().map(|(_, price)| price).mean()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::price_series::{PricePoint, SeriesKey};
    use crate::price_series::tests::day;
    use rstest::rstest;

    fn ramp(len : usize) -> Vec<f64> {
        (0..len).map(|i| 100.0 + 2.0 * i as f64).collect()
    }

    #[test]
    fn increasing_ramp_recommends_selling_and_following_the_trend() -> Result<()> {
        let values = ramp(40);

        let insights = analyze(&values)?;

        assert_eq!(insights.trend, TrendDirection::Increasing);
        assert_eq!(insights.current_price, 178.0);
        let change_7d = insights.price_change_7d.unwrap();
        assert!((change_7d - (178.0 - 166.0) / 166.0 * 100.0).abs() < 1e-9);
        assert!(change_7d > 5.0);
        assert_eq!(insights.trend_strength, Some(TrendStrength::Strong));
        assert_eq!(insights.recommendations, vec!(Recommendation::SellSoon, Recommendation::FollowTrend));
        assert_eq!(insights.recommendations[0].message(),
            "Consider selling soon as prices are showing strong upward trend");
        Ok(())
    }

    #[test]
    fn constant_series_has_zero_volatility_and_counts_as_decreasing() -> Result<()> {
        let insights = analyze(&[50.0; 10])?;

        assert_eq!(insights.volatility, 0.0);
        assert_eq!(insights.trend, TrendDirection::Decreasing);
        assert_eq!(insights.price_change_7d, Some(0.0));
        assert_eq!(insights.price_change_30d, None);
        assert_eq!(insights.trend_strength, None);
        assert!(insights.recommendations.is_empty());
        Ok(())
    }

    #[test]
    fn thirty_observations_define_the_thirty_day_change() -> Result<()> {
        let values = ramp(30);

        let insights = analyze(&values)?;

        assert_eq!(insights.price_change_30d, Some((158.0 - 100.0) / 100.0 * 100.0));
        assert!(insights.trend_strength.is_some());
        Ok(())
    }

    #[test]
    fn twenty_nine_observations_lack_the_thirty_day_change_only() -> Result<()> {
        let values = ramp(29);

        let result = price_change(&values, LONG_WINDOW);
        assert!(matches!(result, Err(ForecastError::InsufficientHistory { required : 30, actual : 29, .. })));

        let insights = analyze(&values)?;
        assert_eq!(insights.price_change_30d, None);
        assert!(insights.price_change_7d.is_some());
        assert_eq!(insights.statistics.min, 100.0);
        assert_eq!(insights.statistics.max, 156.0);
        assert!((insights.statistics.mean - 128.0).abs() < 1e-9);
        assert!(insights.statistics.std > 0.0);
        Ok(())
    }

    #[test]
    fn analyze_is_deterministic() -> Result<()> {
        let values : Vec<f64> = (0..60).map(|i| 2000.0 + (i as f64 * 0.37).sin() * 150.0).collect();
        assert_eq!(analyze(&values)?, analyze(&values)?);
        Ok(())
    }

    #[test]
    fn volatility_is_sample_deviation_of_percentage_changes() -> Result<()> {
        // Changes: +10%, -10%, +10%.
        let values = vec!(100.0, 110.0, 99.0, 108.9);

        let result = volatility(&values)?;

        let changes = [0.1, -0.1, 0.1];
        let mean = changes.iter().sum::<f64>() / 3.0;
        let sample = (changes.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / 2.0).sqrt() * 100.0;
        assert!((result - sample).abs() < 1e-9, "{} vs {}", result, sample);
        Ok(())
    }

    #[test]
    fn zero_price_makes_volatility_non_finite() {
        let result = analyze(&[0.0, 10.0, 12.0]);
        assert!(matches!(result, Err(ForecastError::Numerical(_))));
    }

    #[test]
    fn too_short_series_cannot_be_analyzed() {
        let result = analyze(&[1.0, 2.0]);
        assert!(matches!(result, Err(ForecastError::InsufficientHistory { required : 3, actual : 2, .. })));
    }

    #[rstest]
    #[case(vec!(100.0, 100.0, 100.0, 100.0, 100.0, 100.0, 106.0), vec!(Recommendation::SellSoon))]
    #[case(vec!(100.0, 100.0, 100.0, 100.0, 100.0, 100.0, 94.0), vec!(Recommendation::Hold))]
    #[case(vec!(100.0, 100.0, 100.0, 100.0, 100.0, 100.0, 104.0), vec!())]
    #[case(vec!(100.0, 130.0, 95.0, 120.0, 90.0, 115.0, 100.0), vec!(Recommendation::Diversify))]
    #[case(vec!(100.0, 130.0, 95.0, 120.0, 90.0, 115.0, 120.0), vec!(Recommendation::SellSoon, Recommendation::Diversify))]
    fn recommendation_rules_fire_independently(#[case] values : Vec<f64>, #[case] expected : Vec<Recommendation>) -> Result<()> {
        assert_eq!(analyze(&values)?.recommendations, expected);
        Ok(())
    }

    #[test]
    fn moving_average_is_undefined_until_window_fills() {
        let averages = moving_average(&[1.0, 2.0, 3.0, 4.0], 3);
        assert_eq!(averages, vec!(None, None, Some(2.0), Some(3.0)));
        assert_eq!(moving_average(&[1.0], 0), vec!(None));
    }

    #[test]
    fn recommendations_serialize_as_messages() -> anyhow::Result<()> {
        let json = serde_json::to_string(&vec!(Recommendation::Hold))?;
        assert_eq!(json, r#"["Consider holding as prices are showing strong downward trend"]"#);
        Ok(())
    }

    #[test]
    fn market_summary_compares_locations_on_the_latest_date() -> Result<()> {
        let series = |location : &str, prices : &[f64]| PriceSeries::from_values(
            SeriesKey::new("rice", Some(location)), day(0), prices).unwrap();
        let stale = PriceSeries::new(SeriesKey::new("rice", Some("gujarat")),
            vec!(PricePoint { date : day(0), price : 9999.0 })).unwrap();
        let list = vec!(
            series("punjab", &[2300.0, 2800.0]),
            series("karnataka", &[2100.0, 2500.0]),
            series("maharashtra", &[2000.0, 2600.0]),
            stale);

        let summary = market_summary(&list)?;

        assert_eq!(summary.date, day(1));
        assert_eq!(summary.highest_price, 2800.0);
        assert_eq!(summary.highest_price_location.as_deref(), Some("punjab"));
        assert_eq!(summary.lowest_price, 2500.0);
        assert_eq!(summary.lowest_price_location.as_deref(), Some("karnataka"));
        assert!((summary.average_price - 2633.333333333).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn market_summary_needs_at_least_one_price() {
        assert!(matches!(market_summary(&[]), Err(ForecastError::InvalidSeries(_))));
    }
}
