#[cfg(feature = "bus")]
pub mod bus_client;
pub mod http;
pub mod memory_registry;
pub mod netboot_manager;
pub(crate) mod ws;
