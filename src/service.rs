// SPDX-License-Identifier: GPL-3.0-only
//! Brightness dispatch task
//!
//! One task owns the registry, the reconciler and the settings. Hotkey
//! handlers, popups and the hotplug watcher talk to it through a cloneable
//! [`ServiceHandle`]; commands are handled one at a time, in arrival order,
//! and the pending hardware write fires from the same loop when its
//! debounce deadline passes.
//!
//! DDC/CI traffic blocks for tens of milliseconds per call, and a scan of an
//! unresponsive monitor sleeps between retries. Each step therefore moves the
//! whole service state onto the blocking pool and gets it back when done, so
//! the state keeps a single owner and the runtime stays free.

use std::collections::BTreeMap;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::{Settings, SettingsStore};
use crate::error::{Error, Result};
use crate::monitor::{
    BrightnessChanged, DisplayId, MonitorRegistry, MonitorSnapshot, SubscriptionId,
};
use crate::preset::{PresetCollection, PresetDefinition};
use crate::protocols::DisplaySource;
use crate::reconcile::{BrightnessIntent, Reconciler};

#[derive(Debug)]
pub enum Command {
    Refresh {
        force: bool,
        reply: oneshot::Sender<Result<bool>>,
    },
    Invalidate,
    Intent(BrightnessIntent),
    /// Relative change in multiples of the configured step
    Step(i32),
    /// Write-through path for surfaces that prefer responsiveness over bus load
    SetBrightness {
        device_id: DisplayId,
        value: i32,
        notify: bool,
        reply: oneshot::Sender<bool>,
    },
    /// Persist the current value of a display as its last brightness
    Commit(DisplayId),
    ApplyPreset {
        name: String,
        reply: oneshot::Sender<Result<usize>>,
    },
    SavePreset {
        preset: PresetDefinition,
        reply: oneshot::Sender<Result<()>>,
    },
    DeletePreset {
        name: String,
        reply: oneshot::Sender<Result<bool>>,
    },
    Presets(oneshot::Sender<PresetCollection>),
    Snapshot(oneshot::Sender<Vec<MonitorSnapshot>>),
    Subscribe(oneshot::Sender<Subscription>),
    Unsubscribe(SubscriptionId),
    Shutdown,
}

/// Brightness-changed events for one subscriber, in mutation order.
///
/// Dropping it unsubscribes from the service.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub events: mpsc::UnboundedReceiver<BrightnessChanged>,
    commands: Option<mpsc::WeakUnboundedSender<Command>>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(tx) = self.commands.take().and_then(|weak| weak.upgrade()) {
            let _ = tx.send(Command::Unsubscribe(self.id));
        }
    }
}

pub struct BrightnessService<S: SettingsStore> {
    registry: MonitorRegistry,
    reconciler: Reconciler,
    settings: Settings,
    store: S,
    /// Lets subscriptions send their own unsubscribe without keeping the loop alive
    commands: Option<mpsc::WeakUnboundedSender<Command>>,
}

impl<S: SettingsStore + 'static> BrightnessService<S> {
    pub fn new(source: Box<dyn DisplaySource>, store: S) -> Self {
        let settings = store.load();
        let registry = MonitorRegistry::new(source, settings.probe_options());
        let reconciler = Reconciler::new(settings.debounce());
        Self {
            registry,
            reconciler,
            settings,
            store,
            commands: None,
        }
    }

    /// Run the service on the current tokio runtime
    pub fn spawn(mut self) -> (ServiceHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.commands = Some(tx.downgrade());
        let task = tokio::spawn(self.run(rx));
        (ServiceHandle { tx }, task)
    }

    async fn run(self, mut rx: mpsc::UnboundedReceiver<Command>) {
        info!("Starting brightness service");

        let mut service = self;
        if service.settings.restore_on_start {
            let at = now();
            service = match service.off_runtime(move |s| s.restore_last_brightness(at)).await {
                Some(service) => service,
                None => return,
            };
        }

        loop {
            let deadline = service.reconciler.deadline();
            let step = tokio::select! {
                command = rx.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => {
                        let at = now();
                        service.off_runtime(move |s| s.handle(command, at)).await
                    }
                },
                _ = sleep_until(deadline) => {
                    let at = now();
                    service
                        .off_runtime(move |s| {
                            let written = s.reconciler.poll(&mut s.registry, at);
                            debug!("Debounce window elapsed, synced {} display(s)", written);
                        })
                        .await
                }
            };
            service = match step {
                Some(service) => service,
                None => return,
            };
        }

        service
            .off_runtime(|s| {
                let written = s.reconciler.flush(&mut s.registry);
                if written > 0 {
                    debug!("Flushed {} pending write(s) before shutdown", written);
                }
                s.registry.close();
            })
            .await;
        info!("Brightness service stopped");
    }

    /// Run one step of hardware or settings I/O on the blocking pool.
    ///
    /// Returns `None` if the step panicked; the state went down with it.
    async fn off_runtime<F>(mut self, step: F) -> Option<Self>
    where
        F: FnOnce(&mut Self) + Send + 'static,
    {
        let result = tokio::task::spawn_blocking(move || {
            step(&mut self);
            self
        })
        .await;
        match result {
            Ok(service) => Some(service),
            Err(e) => {
                error!("Brightness service step failed: {}", e);
                None
            }
        }
    }

    fn handle(&mut self, command: Command, now: Instant) {
        match command {
            Command::Refresh { force, reply } => {
                let _ = reply.send(self.reconciler.refresh(&mut self.registry, force));
            }
            Command::Invalidate => {
                info!("Display topology changed, next refresh will re-scan");
                self.registry.invalidate();
            }
            Command::Intent(intent) => self.apply_intent(&intent, now),
            Command::Step(steps) => {
                let delta = steps.saturating_mul(self.settings.step);
                self.apply_intent(&BrightnessIntent::adjust_all(delta), now);
            }
            Command::SetBrightness {
                device_id,
                value,
                notify,
                reply,
            } => {
                let ok = self.registry.set_brightness(&device_id, value as i64, notify);
                let _ = reply.send(ok);
            }
            Command::Commit(device_id) => self.commit(&device_id),
            Command::ApplyPreset { name, reply } => {
                let _ = reply.send(self.apply_preset(&name, now));
            }
            Command::SavePreset { preset, reply } => {
                let result = self
                    .settings
                    .presets
                    .save(preset)
                    .and_then(|_| self.store.save(&self.settings));
                let _ = reply.send(result);
            }
            Command::DeletePreset { name, reply } => {
                let result = if self.settings.presets.delete(&name) {
                    self.store.save(&self.settings).map(|_| true)
                } else {
                    Ok(false)
                };
                let _ = reply.send(result);
            }
            Command::Presets(reply) => {
                let _ = reply.send(self.settings.presets.clone());
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.registry.snapshot());
            }
            Command::Subscribe(reply) => {
                let (tx, events) = mpsc::unbounded_channel();
                let id = self
                    .registry
                    .subscribe_while(move |event| tx.send(event.clone()).is_ok());
                let subscription = Subscription {
                    id,
                    events,
                    commands: self.commands.clone(),
                };
                if let Err(mut subscription) = reply.send(subscription) {
                    // Nobody to unsubscribe later; do it here
                    subscription.commands = None;
                    self.registry.unsubscribe(id);
                }
            }
            Command::Unsubscribe(id) => {
                self.registry.unsubscribe(id);
            }
            Command::Shutdown => {}
        }
    }

    fn apply_intent(&mut self, intent: &BrightnessIntent, now: Instant) {
        // Cheap when already initialized; re-scans after a hotplug
        if let Err(e) = self.reconciler.refresh(&mut self.registry, false) {
            warn!("Ignoring brightness intent, no displays: {}", e);
            return;
        }
        let updated = self.reconciler.apply(&mut self.registry, intent, now);
        debug!(?intent, updated, "Brightness intent staged");
    }

    fn apply_preset(&mut self, name: &str, now: Instant) -> Result<usize> {
        let preset = self
            .settings
            .presets
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Settings(format!("no preset named '{}'", name)))?;
        info!("Applying preset '{}'", preset.name);
        self.reconciler
            .apply_preset(&mut self.registry, &preset, now)
    }

    fn commit(&mut self, device_id: &str) {
        let Some(value) = self.registry.get(device_id).map(|r| r.current_brightness()) else {
            warn!(display_id = %device_id, "Cannot remember brightness of unknown display");
            return;
        };
        self.settings.remember_brightness(device_id, value);
        if let Err(e) = self.store.save(&self.settings) {
            warn!("Failed to persist last brightness: {}", e);
        }
    }

    fn restore_last_brightness(&mut self, now: Instant) {
        if let Err(e) = self.reconciler.refresh(&mut self.registry, false) {
            warn!("Cannot restore brightness: {}", e);
            return;
        }
        let targets: BTreeMap<DisplayId, i32> = self
            .registry
            .get_all()
            .iter()
            .filter_map(|r| {
                self.settings
                    .last_brightness(r.device_id())
                    .map(|v| (r.device_id().to_string(), v as i32))
            })
            .collect();
        let restored = self
            .reconciler
            .apply_targets(&mut self.registry, &targets, now);
        info!("Restored last brightness on {} display(s)", restored);
    }
}

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

/// Cloneable front door to a running [`BrightnessService`]
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl ServiceHandle {
    fn send(&self, command: Command) -> Result<()> {
        self.tx.send(command).map_err(|_| Error::ServiceStopped)
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.send(command(reply))?;
        rx.await.map_err(|_| Error::ServiceStopped)
    }

    /// Re-scan hardware; without `force` only if not yet initialized
    pub async fn refresh(&self, force: bool) -> Result<bool> {
        self.request(|reply| Command::Refresh { force, reply }).await?
    }

    pub fn invalidate(&self) -> Result<()> {
        self.send(Command::Invalidate)
    }

    pub fn intent(&self, intent: BrightnessIntent) -> Result<()> {
        self.send(Command::Intent(intent))
    }

    /// Debounced relative change on every controllable display
    pub fn adjust(&self, delta: i32) -> Result<()> {
        self.intent(BrightnessIntent::adjust_all(delta))
    }

    /// Debounced absolute value on every controllable display
    pub fn set_absolute(&self, value: i32) -> Result<()> {
        self.intent(BrightnessIntent::set_all(value))
    }

    pub fn brightness_up(&self) -> Result<()> {
        self.send(Command::Step(1))
    }

    pub fn brightness_down(&self) -> Result<()> {
        self.send(Command::Step(-1))
    }

    /// Immediate hardware write for one display
    pub async fn set_brightness(&self, device_id: &str, value: i32, notify: bool) -> Result<bool> {
        let device_id = device_id.to_string();
        self.request(|reply| Command::SetBrightness {
            device_id,
            value,
            notify,
            reply,
        })
        .await
    }

    /// Remember the display's current value (slider released)
    pub fn commit(&self, device_id: &str) -> Result<()> {
        self.send(Command::Commit(device_id.to_string()))
    }

    /// Apply a preset by case-insensitive name; returns displays updated
    pub async fn apply_preset(&self, name: &str) -> Result<usize> {
        let name = name.to_string();
        self.request(|reply| Command::ApplyPreset { name, reply }).await?
    }

    pub async fn save_preset(&self, preset: PresetDefinition) -> Result<()> {
        self.request(|reply| Command::SavePreset { preset, reply }).await?
    }

    pub async fn delete_preset(&self, name: &str) -> Result<bool> {
        let name = name.to_string();
        self.request(|reply| Command::DeletePreset { name, reply }).await?
    }

    pub async fn presets(&self) -> Result<PresetCollection> {
        self.request(Command::Presets).await
    }

    pub async fn snapshot(&self) -> Result<Vec<MonitorSnapshot>> {
        self.request(Command::Snapshot).await
    }

    pub async fn subscribe(&self) -> Result<Subscription> {
        self.request(Command::Subscribe).await
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        self.send(Command::Unsubscribe(id))
    }

    /// Flush pending writes, release every channel and stop the task
    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }
}
