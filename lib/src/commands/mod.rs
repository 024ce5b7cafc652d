pub mod forecast;
pub mod plot_history;
pub mod train_model;
