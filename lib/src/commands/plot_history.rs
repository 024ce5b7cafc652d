use crate::commands::forecast::ForecastResult;
use crate::insights::{moving_average, LONG_WINDOW, SHORT_WINDOW};
use crate::plotter::*;
use crate::price_series::*;

fn padded(values : Vec<Option<f64>>, total : usize) -> Vec<Option<f64>> {
    let mut values = values;
    values.resize(total, None);
    values
}

/// Plots the actual prices with their 7- and 30-day moving averages, followed by the forecast if given.
pub fn plot_history(plotter : &mut impl Plotter,
                    series : &PriceSeries,
                    forecast : Option<&ForecastResult>,
                    filename : &str) -> anyhow::Result<()> {
    let values = series.values();
    let forecast_len = forecast.map(|f| f.points.len()).unwrap_or(0);
    let total = values.len() + forecast_len;

    let mut lines = vec!(
        (String::from("Actual Price"), padded(values.iter().map(|&v| Some(v)).collect(), total)),
        (String::from("7-day Moving Average"), padded(moving_average(&values, SHORT_WINDOW), total)),
        (String::from("30-day Moving Average"), padded(moving_average(&values, LONG_WINDOW), total)));

    if let Some(forecast) = forecast {
        // Start the forecast line at the last actual price so the two lines join.
        let mut forecast_line = vec!(None; values.len().saturating_sub(1));
        forecast_line.extend(values.last().map(|&v| Some(v)));
        forecast_line.extend(forecast.points.iter().map(|p| Some(p.price)));
        lines.push((String::from("Forecast"), forecast_line));
    }

    plotter.plot_lines(&lines, &format!("{} prices", series.key()), filename)
}
