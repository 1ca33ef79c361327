use super::super::{Flow, TrayContext, TrayController, PUMP_INTERVAL};
use crate::daemon::HostEvent;
use anyhow::Result;
use gtk::glib;
use tokio::sync::broadcast::error::RecvError;

/// GTK owns its own thread; the caller blocks until a quit is published.
pub fn run(context: TrayContext) -> Result<()> {
    let mut quit_rx = context.events.subscribe();
    let events = context.events.clone();

    std::thread::spawn(move || {
        if gtk::init().is_err() {
            log::error!("Failed to initialize GTK");
            events.send(HostEvent::Quit);
            return;
        }

        let mut controller = match TrayController::new(context) {
            Ok(controller) => controller,
            Err(e) => {
                log::error!("Failed to create tray icon: {:#}", e);
                events.send(HostEvent::Quit);
                return;
            }
        };

        glib::timeout_add_local(PUMP_INTERVAL, move || match controller.pump() {
            Flow::Continue => glib::ControlFlow::Continue,
            Flow::Quit => {
                log::info!("Quitting application");
                gtk::main_quit();
                glib::ControlFlow::Break
            }
        });
        gtk::main();
    });

    loop {
        match quit_rx.blocking_recv() {
            Ok(HostEvent::Quit) | Err(RecvError::Closed) => return Ok(()),
            Ok(_) | Err(RecvError::Lagged(_)) => continue,
        }
    }
}
