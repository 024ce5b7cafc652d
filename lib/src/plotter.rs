#[cfg(test)]
use mockall::{automock};

/// A named line; `None` leaves a gap at that position.
pub type PlotLine = (String, Vec<Option<f64>>);

#[cfg_attr(test, automock)]
pub trait Plotter {
    fn plot_lines(&mut self, lines : &[PlotLine], title : &str, filename : &str) -> anyhow::Result<()>;
}
