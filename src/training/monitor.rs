use crate::training::callbacks::{
    CallbackManager, EarlyStoppingCallback, LossHistoryLogger, ProgressLoggerCallback,
    TimerCallback,
};
use crate::training::{ExperimentConfig, TrainingState};

/// Per-epoch observer of a training run.
///
/// The experiment calls `append_loss` and then `callbacks` once per epoch.
pub trait Monitor {
    fn on_train_begin(&mut self) {}

    /// Record the epoch-mean loss
    fn append_loss(&mut self, loss: f64);

    /// Record the learning rate the epoch ran with
    fn record_lr(&mut self, _lr: f64) {}

    /// Run the per-epoch callbacks
    fn callbacks(&mut self, epoch: usize);

    /// Whether training should end early
    fn should_stop(&self) -> bool {
        false
    }

    fn on_train_end(&mut self) {}

    /// Losses recorded so far
    fn losses(&self) -> &[f64];
}

/// Monitor backed by a [`TrainingState`] and a set of callbacks
pub struct TrainingMonitor {
    state: TrainingState,
    callbacks: CallbackManager,
}

impl TrainingMonitor {
    pub fn new(callbacks: CallbackManager) -> Self {
        Self {
            state: TrainingState::new(),
            callbacks,
        }
    }

    /// Monitor with the callbacks an experiment config asks for
    pub fn from_config(config: &ExperimentConfig) -> Self {
        let mut callbacks = CallbackManager::new();
        callbacks.add_callback(TimerCallback::new());
        if config.verbose >= 1 {
            callbacks.add_callback(ProgressLoggerCallback::new(config.log_every));
        }
        if config.early_stopping_patience > 0 {
            callbacks.add_callback(
                EarlyStoppingCallback::new(config.early_stopping_patience)
                    .with_min_delta(config.early_stopping_min_delta),
            );
        }
        if let Some(path) = &config.loss_log {
            callbacks.add_callback(LossHistoryLogger::new(path).with_flush_every(config.loss_log_every));
        }
        Self::new(callbacks)
    }

    pub fn state(&self) -> &TrainingState {
        &self.state
    }
}

impl Monitor for TrainingMonitor {
    fn on_train_begin(&mut self) {
        self.callbacks.on_train_begin();
    }

    fn append_loss(&mut self, loss: f64) {
        self.state.record_loss(loss);
    }

    fn record_lr(&mut self, lr: f64) {
        self.state.lr_history.push(lr);
    }

    fn callbacks(&mut self, epoch: usize) {
        self.callbacks.on_epoch_end(epoch, &self.state);
    }

    fn should_stop(&self) -> bool {
        self.callbacks.should_stop()
    }

    fn on_train_end(&mut self) {
        self.callbacks.on_train_end(&self.state);
    }

    fn losses(&self) -> &[f64] {
        &self.state.loss_history
    }
}
