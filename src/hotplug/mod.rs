// SPDX-License-Identifier: GPL-3.0-only
//! Display hotplug detection using udev
//!
//! Watches the DRM subsystem for connector changes and marks the registry
//! stale. Nothing is re-scanned here: the next intent or popup refresh
//! picks up the new topology lazily.

mod udev_monitor;

pub use udev_monitor::UdevMonitor;

use crate::service::ServiceHandle;

/// Spawn a dedicated thread that invalidates the registry on every display event.
///
/// The udev socket is not `Send`, so it is created on the watcher thread
/// itself. The thread ends once the service is gone.
pub fn spawn_watcher(handle: ServiceHandle) -> std::io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("display-hotplug".into())
        .spawn(move || {
            let monitor = match UdevMonitor::new() {
                Ok(m) => m,
                Err(e) => {
                    error!("Failed to initialize display hotplug monitoring: {}", e);
                    return;
                }
            };

            let err = monitor.run(|_event| match handle.invalidate() {
                Ok(()) => true,
                Err(_) => {
                    debug!("Brightness service stopped, ending hotplug watch");
                    false
                }
            });

            debug!("Display hotplug monitoring stopped: {}", err);
        })
}
