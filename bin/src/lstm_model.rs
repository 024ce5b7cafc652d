use std::path::Path;

use agri_forecast_lib::{FitOptions, FitReport, ForecastError, ForecastModel};
use agri_forecast_lib::sequence::{split_chronological, Windows};
use agri_forecast_lib::{DROPOUT_RATE, HIDDEN_UNITS};
use anyhow::Context;
use tch::nn::{Module, ModuleT, OptimizerConfig, RNN};
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct LstmTrainingParams {
    pub learning_rate : f64,
    pub seed : Option<i64>
}

impl Default for LstmTrainingParams {
    fn default() -> Self {
        LstmTrainingParams { learning_rate : 1e-3, seed : None }
    }
}

/// Two stacked LSTM layers with dropout after each, read out by a single linear unit.
#[derive(Debug)]
struct LstmRegressor {
    lstm1 : tch::nn::LSTM,
    lstm2 : tch::nn::LSTM,
    output : tch::nn::Linear,
    dropout : f64
}

impl LstmRegressor {
    fn new(root : &tch::nn::Path, n_features : i64) -> LstmRegressor {
        LstmRegressor {
            lstm1 : tch::nn::lstm(root / "lstm1", n_features, HIDDEN_UNITS, Default::default()),
            lstm2 : tch::nn::lstm(root / "lstm2", HIDDEN_UNITS, HIDDEN_UNITS, Default::default()),
            output : tch::nn::linear(root / "output", HIDDEN_UNITS, 1, Default::default()),
            dropout : DROPOUT_RATE
        }
    }
}

impl ModuleT for LstmRegressor {
    // xs: [batch, window, features] -> [batch, 1]
    fn forward_t(&self, xs : &tch::Tensor, train : bool) -> tch::Tensor {
        let (sequence, _) = self.lstm1.seq(xs);
        let sequence = sequence.dropout(self.dropout, train);
        let (sequence, _) = self.lstm2.seq(&sequence);
        let last_step = sequence.select(1, -1).dropout(self.dropout, train);
        self.output.forward(&last_step)
    }
}

#[derive(Debug)]
struct NetworkState {
    var_store : tch::nn::VarStore,
    network : LstmRegressor,
    window_length : usize,
    n_features : usize,
    trained : bool
}

pub struct LstmForecastModel {
    state : Option<NetworkState>
}

impl LstmForecastModel {
    pub fn new() -> LstmForecastModel {
        LstmForecastModel { state : None }
    }

    fn trained_state(&self) -> agri_forecast_lib::Result<&NetworkState> {
        self.state.as_ref().filter(|s| s.trained).ok_or(ForecastError::ModelNotTrained)
    }

    fn input_tensor(inputs : &[Vec<f64>], window_length : usize, n_features : usize) -> agri_forecast_lib::Result<tch::Tensor> {
        if let Some(bad) = inputs.iter().find(|w| w.len() != window_length * n_features) {
            return Err(ForecastError::InvalidArgument(
                format!("Input window has {} values, model expects {}", bad.len(), window_length * n_features)));
        }

        let flat : Vec<f32> = inputs.iter().flatten().map(|&v| v as f32).collect();
        Ok(tch::Tensor::from_slice(&flat).reshape([inputs.len() as i64, window_length as i64, n_features as i64]))
    }

    fn label_tensor(labels : &[f64]) -> tch::Tensor {
        let flat : Vec<f32> = labels.iter().map(|&v| v as f32).collect();
        tch::Tensor::from_slice(&flat).reshape([labels.len() as i64, 1])
    }
}

impl Default for LstmForecastModel {
    fn default() -> Self {
        LstmForecastModel::new()
    }
}

impl ForecastModel for LstmForecastModel {
    type TrainingParams = LstmTrainingParams;

    fn build(&mut self, window_length : usize, n_features : usize) -> agri_forecast_lib::Result<()> {
        if window_length == 0 || n_features == 0 {
            return Err(ForecastError::InvalidArgument(
                format!("Cannot build a network for window {} with {} features", window_length, n_features)));
        }

        let var_store = tch::nn::VarStore::new(tch::Device::Cpu);
        let network = LstmRegressor::new(&var_store.root(), n_features as i64);
        self.state = Some(NetworkState { var_store, network, window_length, n_features, trained : false });
        Ok(())
    }

    fn fit(&mut self, windows : &Windows, options : &FitOptions,
           &LstmTrainingParams { learning_rate, seed } : &Self::TrainingParams) -> agri_forecast_lib::Result<FitReport> {
        let state = self.state.as_mut().ok_or(ForecastError::ModelNotTrained)?;
        if options.batch_size == 0 {
            return Err(ForecastError::InvalidArgument(String::from("Batch size must be greater than zero")));
        }
        if let Some(seed) = seed {
            tch::manual_seed(seed);
        }

        let (train, validation) = split_chronological(windows, options.validation_fraction)?;
        let train_input = LstmForecastModel::input_tensor(&train.inputs, state.window_length, state.n_features)?;
        let train_labels = LstmForecastModel::label_tensor(&train.labels);
        let validation_tensors = if validation.is_empty() {
            None
        }
        else {
            Some((LstmForecastModel::input_tensor(&validation.inputs, state.window_length, state.n_features)?,
                  LstmForecastModel::label_tensor(&validation.labels)))
        };

        let mut optimizer = tch::nn::Adam::default().build(&state.var_store, learning_rate)
            .context("Could not create optimizer")?;

        let train_size = train.len() as i64;
        let batch_size = options.batch_size as i64;
        let mut report = FitReport::default();
        for epoch in 0..options.epochs {
            // Batches are shuffled within the training part only; validation stays the chronological tail.
            let order = tch::Tensor::randperm(train_size, (tch::Kind::Int64, tch::Device::Cpu));
            let mut loss_sum = 0.0;
            let mut start = 0;
            while start < train_size {
                let length = batch_size.min(train_size - start);
                let batch = order.narrow(0, start, length);
                let batch_input = train_input.index_select(0, &batch);
                let batch_labels = train_labels.index_select(0, &batch);

                let loss = state.network.forward_t(&batch_input, true)
                    .mse_loss(&batch_labels, tch::Reduction::Mean);
                optimizer.backward_step(&loss);

                loss_sum += loss.double_value(&[]) * length as f64;
                start += length;
            }

            let train_loss = loss_sum / train_size as f64;
            if !train_loss.is_finite() {
                return Err(ForecastError::Numerical(format!("Training loss became {} at epoch {}", train_loss, epoch)));
            }

            let validation_loss = validation_tensors.as_ref().map(|(input, labels)| {
                tch::no_grad(|| state.network.forward_t(input, false).mse_loss(labels, tch::Reduction::Mean).double_value(&[]))
            });

            debug!("epoch: {:4} train loss: {:8.5} validation loss: {:?}", epoch, train_loss, validation_loss);
            report.train_loss.push(train_loss);
            report.validation_loss.push(validation_loss);
        }

        state.trained = true;
        Ok(report)
    }

    fn predict(&self, inputs : &[Vec<f64>]) -> agri_forecast_lib::Result<Vec<f64>> {
        let state = self.trained_state()?;
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let input = LstmForecastModel::input_tensor(inputs, state.window_length, state.n_features)?;
        let output = tch::no_grad(|| state.network.forward_t(&input, false));
        Ok((0..inputs.len() as i64).map(|i| output.double_value(&[i, 0])).collect())
    }

    fn window_length(&self) -> agri_forecast_lib::Result<usize> {
        self.state.as_ref().map(|s| s.window_length).ok_or(ForecastError::ModelNotTrained)
    }

    fn save(&self, path : &Path) -> agri_forecast_lib::Result<()> {
        let state = self.trained_state()?;
        state.var_store.save(path).with_context(|| format!("Could not save weights to {}", path.display()))?;
        Ok(())
    }

    fn load(&mut self, path : &Path) -> agri_forecast_lib::Result<()> {
        let state = self.state.as_mut().ok_or(ForecastError::ModelNotTrained)?;
        state.var_store.load(path).with_context(|| format!("Could not load weights from {}", path.display()))?;
        state.trained = true;
        Ok(())
    }
}
