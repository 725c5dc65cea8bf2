// SPDX-License-Identifier: GPL-3.0-only

use std::os::fd::AsRawFd;

/// Blocking udev listener for DRM events
pub struct UdevMonitor {
    socket: udev::MonitorSocket,
}

impl UdevMonitor {
    /// Listen on the DRM subsystem. Connector hotplug shows up as a
    /// `change` event on the card's `drm_minor` device.
    pub fn new() -> Result<Self, std::io::Error> {
        let socket = udev::MonitorBuilder::new()?
            .match_subsystem_devtype("drm", "drm_minor")?
            .listen()?;

        Ok(Self { socket })
    }

    /// Poll the socket and call `callback` for every add/remove/change event
    /// until it returns false. Only returns on error or when stopped.
    pub fn run<F>(self, mut callback: F) -> std::io::Error
    where
        F: FnMut(udev::Event) -> bool,
    {
        info!("Display hotplug monitoring started");

        let fd = self.socket.as_raw_fd();

        loop {
            let mut poll_fd = libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            };

            // Negative timeout blocks until the socket is readable
            let poll_result = unsafe { libc::poll(&mut poll_fd, 1, -1) };

            if poll_result < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                error!("Poll error: {}", err);
                return err;
            }

            for event in self.socket.iter() {
                match event.event_type() {
                    udev::EventType::Add | udev::EventType::Remove | udev::EventType::Change => {
                        info!(
                            "Display event detected: {:?} at {:?}",
                            event.event_type(),
                            event.syspath()
                        );
                        if !callback(event) {
                            return std::io::Error::new(
                                std::io::ErrorKind::Interrupted,
                                "Stopped by callback",
                            );
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}
