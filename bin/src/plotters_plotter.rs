use agri_forecast_lib::{PlotLine, Plotter};
use plotters::prelude::*;

pub struct PlottersPlotter{}

impl PlottersPlotter {
    pub fn create() -> anyhow::Result<PlottersPlotter> {
        Ok(PlottersPlotter{})
    }
}

impl Plotter for PlottersPlotter {
    fn plot_lines(&mut self, lines : &[PlotLine], title : &str, filename : &str) -> anyhow::Result<()> {
        let x_len = lines.iter().map(|(_, points)| points.len()).max().unwrap_or(0);
        anyhow::ensure!(x_len > 0, "Nothing to plot for '{}'", title);

        let mut min_y = f64::INFINITY;
        let mut max_y = f64::NEG_INFINITY;
        for value in lines.iter().flat_map(|(_, points)| points.iter().flatten()) {
            min_y = min_y.min(*value);
            max_y = max_y.max(*value);
        }
        anyhow::ensure!(min_y.is_finite() && max_y.is_finite(), "No values to plot for '{}'", title);
        if min_y == max_y {
            min_y -= 1.0;
            max_y += 1.0;
        }

        let png_filename = format!("{}.png", filename);
        let root_area =
            BitMapBackend::new(&png_filename, (1920, 1080)).into_drawing_area();
        root_area.fill(&WHITE)?;

        let root_area = root_area.titled(title, ("sans-serif", 18))?;

        let mut cc = ChartBuilder::on(&root_area)
            .margin(5)
            .set_all_label_area_size(50)
            .build_cartesian_2d(0.0..x_len as f64, min_y..max_y)?;

        cc.configure_mesh()
            .x_labels(20)
            .y_labels(10)
            .x_desc("Day")
            .y_desc("Price")
            .draw()?;

        for (i, (label, points)) in lines.iter().enumerate() {
            let color = PlottersPlotter::get_color(i);
            // Missing values split a line into separate segments.
            let segments = split_at_gaps(points);
            for (n, segment) in segments.into_iter().enumerate() {
                let series = cc.draw_series(LineSeries::new(segment, &color))?;
                if n == 0 {
                    series.label(label.as_str())
                        .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &color));
                }
            }
        }

        cc.configure_series_labels().border_style(&BLACK).background_style(&WHITE).draw()?;
        root_area.present()?;

        Ok(())
    }
}

impl PlottersPlotter {
    fn get_color(i: usize) -> RGBColor {
        match i {
            0 => BLUE,
            1 => GREEN,
            2 => RED,
            3 => MAGENTA,
            4 => CYAN,
            _ => BLACK
        }
    }
}

fn split_at_gaps(points : &[Option<f64>]) -> Vec<Vec<(f64, f64)>> {
    let mut segments = Vec::new();
    let mut current = Vec::new();
    for (x, point) in points.iter().enumerate() {
        match point {
            Some(y) => current.push((x as f64, *y)),
            None if !current.is_empty() => segments.push(std::mem::take(&mut current)),
            None => {}
        }
    }
    if !current.is_empty() {
        segments.push(current);
    }
    segments
}
