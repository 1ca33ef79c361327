use objc2::rc::Retained;
use objc2::runtime::AnyObject;
use objc2::{class, msg_send};

/// NSApplicationActivationPolicyAccessory: no Dock icon, no app menu.
const ACTIVATION_POLICY_ACCESSORY: isize = 1;

/// A tray-only process must be an accessory app before the status item
/// is created.
pub fn prepare_application() {
    unsafe {
        let app: Retained<AnyObject> = msg_send![class!(NSApplication), sharedApplication];
        let _: bool = msg_send![&app, setActivationPolicy: ACTIVATION_POLICY_ACCESSORY];
        let _: () = msg_send![&app, finishLaunching];
    }
}
