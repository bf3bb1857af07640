use crate::training::TrainingState;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Training callback trait
///
/// Callbacks run after the epoch loss has been recorded in the state.
pub trait TrainingCallback: Send {
    /// Called at the start of training
    fn on_train_begin(&mut self) {}

    /// Called at the end of training
    fn on_train_end(&mut self, _state: &TrainingState) {}

    /// Called at the end of each epoch
    fn on_epoch_end(&mut self, _epoch: usize, _state: &TrainingState) {}

    /// Whether this callback asks training to stop
    fn should_stop(&self) -> bool {
        false
    }
}

/// Callback manager that handles multiple callbacks
pub struct CallbackManager {
    callbacks: Vec<Box<dyn TrainingCallback>>,
}

impl CallbackManager {
    /// Create new callback manager
    pub fn new() -> Self {
        Self {
            callbacks: Vec::new(),
        }
    }

    /// Add a callback
    pub fn add_callback<C: TrainingCallback + 'static>(&mut self, callback: C) {
        self.callbacks.push(Box::new(callback));
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Call on_train_begin for all callbacks
    pub fn on_train_begin(&mut self) {
        for callback in &mut self.callbacks {
            callback.on_train_begin();
        }
    }

    /// Call on_train_end for all callbacks
    pub fn on_train_end(&mut self, state: &TrainingState) {
        for callback in &mut self.callbacks {
            callback.on_train_end(state);
        }
    }

    /// Call on_epoch_end for all callbacks
    pub fn on_epoch_end(&mut self, epoch: usize, state: &TrainingState) {
        for callback in &mut self.callbacks {
            callback.on_epoch_end(epoch, state);
        }
    }

    /// True as soon as any callback requests a stop
    pub fn should_stop(&self) -> bool {
        self.callbacks.iter().any(|c| c.should_stop())
    }
}

impl Default for CallbackManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Stops training when the epoch loss has not improved for `patience` epochs
pub struct EarlyStoppingCallback {
    patience: usize,
    min_delta: f64,
    best_loss: f64,
    counter: usize,
    should_stop: bool,
}

impl EarlyStoppingCallback {
    /// Create new early stopping callback
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            min_delta: 1e-4,
            best_loss: f64::INFINITY,
            counter: 0,
            should_stop: false,
        }
    }

    /// Smallest decrease that counts as an improvement
    pub fn with_min_delta(mut self, min_delta: f64) -> Self {
        self.min_delta = min_delta;
        self
    }
}

impl TrainingCallback for EarlyStoppingCallback {
    fn on_epoch_end(&mut self, epoch: usize, state: &TrainingState) {
        let Some(loss) = state.last_loss() else {
            return;
        };

        if loss < self.best_loss - self.min_delta {
            self.best_loss = loss;
            self.counter = 0;
        } else {
            self.counter += 1;
            if self.counter >= self.patience && !self.should_stop {
                tracing::info!(
                    "Early stopping at epoch {}: no improvement for {} epochs (best {:.6})",
                    epoch + 1,
                    self.counter,
                    self.best_loss
                );
                self.should_stop = true;
            }
        }
    }

    fn should_stop(&self) -> bool {
        self.should_stop
    }
}

/// Progress logging callback
pub struct ProgressLoggerCallback {
    log_frequency: usize,
}

impl ProgressLoggerCallback {
    /// Create new progress logger
    pub fn new(log_frequency: usize) -> Self {
        Self {
            log_frequency: log_frequency.max(1),
        }
    }
}

impl TrainingCallback for ProgressLoggerCallback {
    fn on_epoch_end(&mut self, epoch: usize, state: &TrainingState) {
        if (epoch + 1) % self.log_frequency == 0 {
            tracing::info!(
                "Epoch {} - Loss: {:.6}, LR: {:.2e}",
                epoch + 1,
                state.last_loss().unwrap_or(f64::NAN),
                state.lr_history.last().copied().unwrap_or(f64::NAN)
            );
        }
    }
}

#[derive(Serialize)]
struct LossRecord {
    epoch: usize,
    loss: f64,
    lr: Option<f64>,
}

/// Writes the loss history to a JSON file
pub struct LossHistoryLogger {
    log_file: PathBuf,
    /// Rewrite the file every this many epochs (0 = only at the end)
    flush_every: usize,
}

impl LossHistoryLogger {
    /// Create new loss history logger
    pub fn new<P: AsRef<Path>>(log_file: P) -> Self {
        Self {
            log_file: log_file.as_ref().to_path_buf(),
            flush_every: 0,
        }
    }

    pub fn with_flush_every(mut self, flush_every: usize) -> Self {
        self.flush_every = flush_every;
        self
    }

    /// Save history to file
    fn save(&self, state: &TrainingState) -> crate::Result<()> {
        let records: Vec<LossRecord> = state
            .loss_history
            .iter()
            .enumerate()
            .map(|(epoch, &loss)| LossRecord {
                epoch,
                loss,
                lr: state.lr_history.get(epoch).copied(),
            })
            .collect();
        let json = serde_json::to_string_pretty(&records)?;
        std::fs::write(&self.log_file, json)?;
        Ok(())
    }
}

impl TrainingCallback for LossHistoryLogger {
    fn on_epoch_end(&mut self, epoch: usize, state: &TrainingState) {
        if self.flush_every > 0 && (epoch + 1) % self.flush_every == 0 {
            if let Err(e) = self.save(state) {
                tracing::warn!("Failed to save loss history: {}", e);
            }
        }
    }

    fn on_train_end(&mut self, state: &TrainingState) {
        match self.save(state) {
            Ok(()) => tracing::debug!("Saved loss history to {:?}", self.log_file),
            Err(e) => tracing::warn!("Failed to save final loss history: {}", e),
        }
    }
}

/// Timer callback that tracks training time
pub struct TimerCallback {
    start_time: Option<Instant>,
    last_epoch: Option<Instant>,
    epoch_times: Vec<Duration>,
}

impl TimerCallback {
    /// Create new timer callback
    pub fn new() -> Self {
        Self {
            start_time: None,
            last_epoch: None,
            epoch_times: Vec::new(),
        }
    }

    /// Get average epoch time
    pub fn average_epoch_time(&self) -> Option<Duration> {
        if self.epoch_times.is_empty() {
            None
        } else {
            let total: Duration = self.epoch_times.iter().sum();
            Some(total / self.epoch_times.len() as u32)
        }
    }

    /// Get total training time
    pub fn total_time(&self) -> Option<Duration> {
        self.start_time.map(|t| t.elapsed())
    }
}

impl Default for TimerCallback {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainingCallback for TimerCallback {
    fn on_train_begin(&mut self) {
        let now = Instant::now();
        self.start_time = Some(now);
        self.last_epoch = Some(now);
        tracing::info!("Training started");
    }

    fn on_epoch_end(&mut self, _epoch: usize, _state: &TrainingState) {
        let now = Instant::now();
        if let Some(last) = self.last_epoch.replace(now) {
            self.epoch_times.push(now - last);
        }
    }

    fn on_train_end(&mut self, state: &TrainingState) {
        if let Some(duration) = self.total_time() {
            tracing::info!(
                "Training completed in {} ({} epochs, {:.2?} per epoch)",
                crate::utils::format_duration(duration.as_secs_f64()),
                state.epoch,
                self.average_epoch_time().unwrap_or_default()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn state_with(losses: &[f64]) -> TrainingState {
        let mut state = TrainingState::new();
        for &loss in losses {
            state.record_loss(loss);
        }
        state
    }

    #[test]
    fn test_early_stopping() {
        let mut callback = EarlyStoppingCallback::new(2);

        callback.on_epoch_end(0, &state_with(&[1.0]));
        assert!(!callback.should_stop());

        // worse loss
        callback.on_epoch_end(1, &state_with(&[1.0, 1.1]));
        assert!(!callback.should_stop());

        // still worse
        callback.on_epoch_end(2, &state_with(&[1.0, 1.1, 1.2]));
        assert!(callback.should_stop());
    }

    #[test]
    fn test_early_stopping_min_delta() {
        let mut callback = EarlyStoppingCallback::new(1).with_min_delta(0.1);
        callback.on_epoch_end(0, &state_with(&[1.0]));
        // 0.95 is better, but not by more than the delta
        callback.on_epoch_end(1, &state_with(&[1.0, 0.95]));
        assert!(callback.should_stop());
    }

    #[test]
    fn test_callback_manager_reports_stop() {
        let mut manager = CallbackManager::new();
        manager.add_callback(ProgressLoggerCallback::new(1));
        manager.add_callback(TimerCallback::new());
        manager.add_callback(EarlyStoppingCallback::new(1));
        assert_eq!(manager.len(), 3);

        manager.on_train_begin();
        manager.on_epoch_end(0, &state_with(&[0.5]));
        assert!(!manager.should_stop());
        manager.on_epoch_end(1, &state_with(&[0.5, 0.5]));
        assert!(manager.should_stop());
        manager.on_train_end(&state_with(&[0.5, 0.5]));
    }

    #[test]
    fn test_loss_history_written_at_train_end() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("loss.json");
        let mut logger = LossHistoryLogger::new(&path);

        let mut state = state_with(&[0.3, 0.2]);
        state.lr_history = vec![1e-4, 1e-4];
        logger.on_epoch_end(1, &state);
        assert!(!path.exists());
        logger.on_train_end(&state);

        let records: Vec<serde_json::Value> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["epoch"], 1);
        assert_eq!(records[1]["loss"], 0.2);
    }

    #[test]
    fn test_loss_history_flushed_during_training() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("loss.json");
        let mut logger = LossHistoryLogger::new(&path).with_flush_every(2);

        logger.on_epoch_end(0, &state_with(&[0.3]));
        assert!(!path.exists());
        logger.on_epoch_end(1, &state_with(&[0.3, 0.2]));

        let records: Vec<serde_json::Value> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0]["lr"].is_null());
    }
}
