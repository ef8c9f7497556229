/// Video capture formats of one camera
pub mod capabilities;
/// Default devices of every slot
pub mod defaults;
/// Device listing
pub mod list;
/// Live hotplug events
pub mod watch;

pub use capabilities::CapabilitiesCommand;
pub use defaults::DefaultsCommand;
pub use list::{ListCommand, ListKind};
pub use watch::watch;
