use std::path::PathBuf;

use agri_forecast_lib::{PriceSeries, SeriesKey, Storage};
use anyhow::Context;
use tracing::debug;

/// Price histories kept as one JSON document per series under `data_dir`.
pub struct FileStorage {
    data_dir : PathBuf
}

impl FileStorage {
    pub fn create(data_dir : impl Into<PathBuf>) -> anyhow::Result<FileStorage> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Could not create data directory {}", data_dir.display()))?;
        Ok(FileStorage { data_dir })
    }

    fn series_path(&self, key : &SeriesKey) -> PathBuf {
        self.data_dir.join(format!("{}.json", key.storage_name()))
    }
}

impl Storage for FileStorage {
    fn save_price_history(&mut self, series : &PriceSeries) -> anyhow::Result<()> {
        let path = self.series_path(series.key());
        let file = std::fs::File::create(&path)
            .with_context(|| format!("Could not create {}", path.display()))?;

        ::serde_json::to_writer_pretty(&file, series)?;
        debug!(path = %path.display(), points = series.len(), "Saved price history");
        Ok(())
    }

    fn load_price_history(&mut self, key : &SeriesKey) -> anyhow::Result<PriceSeries> {
        let path = self.series_path(key);
        let file = std::fs::File::open(&path)
            .with_context(|| format!("Could not open {}", path.display()))?;
        let series : PriceSeries = ::serde_json::from_reader(std::io::BufReader::new(file))
            .with_context(|| format!("Could not parse {}", path.display()))?;

        anyhow::ensure!(series.key() == key, "{} holds {} instead of {}", path.display(), series.key(), key);
        Ok(series)
    }
}
