pub mod device;
pub mod handlers;
pub mod notify;
pub mod protocol;
pub mod server;

pub use device::{DeviceGateway, HttpDevice, LockAction};
pub use notify::{LogNotifier, Notification, Notifier, SmtpNotifier, notifier_from_config};
pub use server::{router, serve};
