use super::super::{Flow, TrayContext, TrayController, PUMP_INTERVAL};
use anyhow::Result;

/// The tray lives on the calling thread, which is pumped until quit.
pub fn run(context: TrayContext) -> Result<()> {
    let mut controller = TrayController::new(context)?;

    loop {
        if let Flow::Quit = controller.pump() {
            log::info!("Quitting application");
            return Ok(());
        }
        std::thread::sleep(PUMP_INTERVAL);
    }
}
