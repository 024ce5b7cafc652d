mod file_storage;
mod lstm_model;
mod plotters_plotter;
mod synthetic_storage;

use std::path::PathBuf;

use agri_forecast_lib::commands::plot_history::plot_history;
use agri_forecast_lib::insights::market_summary;
use agri_forecast_lib::{FallbackStorage, ForecastConfig, ForecastMode, ModelStore, PriceSeries, SeriesKey, Storage};
use anyhow::Context;
use serde::Serialize;
use structopt::StructOpt;
use tracing::info;
use tracing_subscriber::EnvFilter;

use file_storage::FileStorage;
use lstm_model::{LstmForecastModel, LstmTrainingParams};
use plotters_plotter::PlottersPlotter;
use synthetic_storage::SyntheticStorage;

const DEFAULT_SYNTHETIC_SEED : u64 = 42;

#[derive(Debug, StructOpt)]
#[structopt(name = "agri-forecast", about = "Commodity price forecasting with LSTM models")]
struct Opt {
    /// JSON configuration file; flags below override its values
    #[structopt(long, parse(from_os_str))]
    config : Option<PathBuf>,

    #[structopt(long, parse(from_os_str))]
    models_dir : Option<PathBuf>,

    #[structopt(long, parse(from_os_str))]
    data_dir : Option<PathBuf>,

    /// Seed for weight initialization, batch shuffling and synthetic prices
    #[structopt(long)]
    seed : Option<i64>,

    #[structopt(subcommand)]
    command : Command
}

#[derive(Debug, StructOpt)]
struct SeriesArgs {
    #[structopt(short, long)]
    commodity : String,

    #[structopt(short, long)]
    location : Option<String>
}

impl SeriesArgs {
    fn key(&self) -> SeriesKey {
        SeriesKey::new(&self.commodity, self.location.as_deref())
    }
}

#[derive(Debug, StructOpt)]
struct TrainingArgs {
    #[structopt(long)]
    epochs : Option<u32>,

    #[structopt(long)]
    batch_size : Option<usize>,

    #[structopt(long)]
    window_length : Option<usize>,

    #[structopt(long)]
    learning_rate : Option<f64>
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Writes a synthetic price history into the data directory
    Generate {
        #[structopt(flatten)]
        series : SeriesArgs
    },
    /// Trains and stores the model for one series
    Train {
        #[structopt(flatten)]
        series : SeriesArgs,
        #[structopt(flatten)]
        training : TrainingArgs
    },
    /// Trains one model per commodity; failures do not stop the others
    TrainAll {
        #[structopt(long, use_delimiter = true, default_value = "rice,wheat,maize,potato,onion")]
        commodities : Vec<String>,
        #[structopt(short, long)]
        location : Option<String>,
        #[structopt(flatten)]
        training : TrainingArgs
    },
    /// Forecasts daily prices, training a model first when none is stored
    Forecast {
        #[structopt(flatten)]
        series : SeriesArgs,
        #[structopt(long, default_value = "30")]
        days : u32,
        /// repeated or autoregressive
        #[structopt(long)]
        mode : Option<ForecastMode>,
        /// Only use the stored model and its saved history
        #[structopt(long)]
        stored_only : bool,
        #[structopt(flatten)]
        training : TrainingArgs
    },
    /// Prints trend, volatility and recommendations for a series
    Analyze {
        #[structopt(flatten)]
        series : SeriesArgs
    },
    /// Prints the most recent daily prices of a series
    Trends {
        #[structopt(flatten)]
        series : SeriesArgs,
        #[structopt(long, default_value = "30")]
        days : usize
    },
    /// Lists the keys of all stored models
    ListModels,
    /// Renders the price history, its moving averages and optionally a forecast to PNG
    Chart {
        #[structopt(flatten)]
        series : SeriesArgs,
        #[structopt(long)]
        forecast_days : Option<u32>,
        #[structopt(long, parse(from_os_str), default_value = "charts")]
        output_dir : PathBuf
    },
    /// Compares the latest prices of a commodity across locations
    Summary {
        #[structopt(short, long)]
        commodity : String,
        #[structopt(long, use_delimiter = true)]
        locations : Vec<String>
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(opt : &Opt) -> anyhow::Result<ForecastConfig> {
    let mut config = match &opt.config {
        Some(path) => ForecastConfig::from_file(path)?,
        None => ForecastConfig::default()
    };
    if let Some(models_dir) = &opt.models_dir {
        config.set_models_dir(models_dir.clone());
    }
    if let Some(data_dir) = &opt.data_dir {
        config.set_data_dir(data_dir.clone());
    }
    if opt.seed.is_some() {
        config.set_seed(opt.seed);
    }
    Ok(config)
}

fn apply_training_args(config : &mut ForecastConfig, args : &TrainingArgs) {
    if let Some(epochs) = args.epochs {
        config.training.fit.set_epochs(epochs);
    }
    if let Some(batch_size) = args.batch_size {
        config.training.fit.set_batch_size(batch_size);
    }
    if let Some(window_length) = args.window_length {
        config.training.set_window_length(window_length);
    }
    if let Some(learning_rate) = args.learning_rate {
        config.set_learning_rate(learning_rate);
    }
}

fn training_params(config : &ForecastConfig) -> LstmTrainingParams {
    LstmTrainingParams { learning_rate : config.learning_rate, seed : config.seed }
}

fn price_storage(config : &ForecastConfig) -> anyhow::Result<FallbackStorage<FileStorage, SyntheticStorage>> {
    let synthetic_seed = config.seed.map(|s| s as u64).unwrap_or(DEFAULT_SYNTHETIC_SEED);
    Ok(FallbackStorage::new(FileStorage::create(&config.data_dir)?, SyntheticStorage::create(synthetic_seed)?))
}

fn recent_prices(history : &PriceSeries, days : usize) -> anyhow::Result<PriceSeries> {
    anyhow::ensure!(days > 0, "The trend view needs at least one day");
    Ok(history.tail(days))
}

fn print_json<T : Serialize + ?Sized>(value : &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(opt : Opt) -> anyhow::Result<()> {
    let mut config = load_config(&opt)?;

    match opt.command {
        Command::Generate { series } => {
            let key = series.key();
            let synthetic_seed = config.seed.map(|s| s as u64).unwrap_or(DEFAULT_SYNTHETIC_SEED);
            let history = SyntheticStorage::create(synthetic_seed)?.generate(&key)?;
            FileStorage::create(&config.data_dir)?.save_price_history(&history)?;
            print_json(&serde_json::json!({
                "key" : key.storage_name(),
                "points" : history.len(),
                "last_date" : history.last_date()
            }))
        },
        Command::Train { series, training } => {
            apply_training_args(&mut config, &training);
            let key = series.key();
            let history = price_storage(&config)?.load_price_history(&key)?;
            let store = ModelStore::open(&config.models_dir)?;
            let metadata = agri_forecast_lib::try_train_model(&mut LstmForecastModel::new(), &store,
                &key.storage_name(), &history, &config.training, &training_params(&config))
                .with_context(|| format!("Training failed for {}", key))?;
            print_json(&metadata)
        },
        Command::TrainAll { commodities, location, training } => {
            apply_training_args(&mut config, &training);
            let keys : Vec<SeriesKey> = commodities.iter()
                .map(|c| SeriesKey::new(c, location.as_deref()))
                .collect();
            let store = ModelStore::open(&config.models_dir)?;
            let results = agri_forecast_lib::train_from_storage(LstmForecastModel::new, &mut price_storage(&config)?,
                &store, &keys, &config.training, &training_params(&config));
            info!("Trained {} of {} models", results.values().filter(|&&ok| ok).count(), results.len());
            print_json(&results)
        },
        Command::Forecast { series, days, mode, stored_only, training } => {
            apply_training_args(&mut config, &training);
            let key = series.key();
            let history = if stored_only { None } else { Some(price_storage(&config)?.load_price_history(&key)?) };
            let store = ModelStore::open(&config.models_dir)?;
            let report = agri_forecast_lib::forecast(&mut LstmForecastModel::new(), &store, &key.storage_name(), days,
                history.as_ref(), mode.unwrap_or(config.forecast_mode), &config.training, &training_params(&config))
                .with_context(|| format!("Forecast failed for {}", key))?;
            print_json(&report)
        },
        Command::Analyze { series } => {
            let key = series.key();
            let history = price_storage(&config)?.load_price_history(&key)?;
            let insights = agri_forecast_lib::analyze(&history.values())
                .with_context(|| format!("Analysis failed for {}", key))?;
            print_json(&insights)
        },
        Command::Trends { series, days } => {
            let history = price_storage(&config)?.load_price_history(&series.key())?;
            print_json(&recent_prices(&history, days)?)
        },
        Command::ListModels => {
            let store = ModelStore::open(&config.models_dir)?;
            print_json(&store.list_available()?)
        },
        Command::Chart { series, forecast_days, output_dir } => {
            let key = series.key();
            let history = price_storage(&config)?.load_price_history(&key)?;
            let forecast = match forecast_days {
                Some(days) => {
                    let store = ModelStore::open(&config.models_dir)?;
                    let report = agri_forecast_lib::forecast(&mut LstmForecastModel::new(), &store, &key.storage_name(),
                        days, Some(&history), config.forecast_mode, &config.training, &training_params(&config))?;
                    Some(report.forecast)
                },
                None => None
            };

            std::fs::create_dir_all(&output_dir)
                .with_context(|| format!("Could not create chart directory {}", output_dir.display()))?;
            let filename = output_dir.join(key.storage_name());
            plot_history(&mut PlottersPlotter::create()?, &history, forecast.as_ref(), &filename.to_string_lossy())?;
            print_json(&serde_json::json!({ "chart" : format!("{}.png", filename.display()) }))
        },
        Command::Summary { commodity, locations } => {
            anyhow::ensure!(!locations.is_empty(), "At least one location is required for a market summary");
            let mut storage = price_storage(&config)?;
            let series_list = locations.iter()
                .map(|location| storage.load_price_history(&SeriesKey::new(&commodity, Some(location))))
                .collect::<anyhow::Result<Vec<_>>>()?;
            print_json(&market_summary(&series_list)?)
        }
    }
}

fn main() -> anyhow::Result<()> {
    init_logging();
    run(Opt::from_args())
}
